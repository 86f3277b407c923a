/*
 *  Copyright (c) 2012 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use std::collections::VecDeque;

use crate::api::units::{DataRate, TimeDelta, Timestamp};

/// Tracks the minimum bitrate seen over a trailing time window.
///
/// Implemented as the typical monotonic deque: stale samples are pruned from
/// the front and dominated samples are popped from the back before a new
/// sample is pushed, so the front always holds the window minimum. The size
/// is bounded by the number of strictly increasing steps inside the window.
pub struct MinBitrateHistory {
    window: TimeDelta,
    history: VecDeque<(Timestamp, DataRate)>,
}

impl MinBitrateHistory {
    pub fn new(window: TimeDelta) -> Self {
        assert!(window > TimeDelta::zero());
        Self {
            window,
            history: VecDeque::new(),
        }
    }

    /// Prunes stale entries and pushes a new sample. After this returns,
    /// `min()` is the minimum bitrate seen during the last window.
    pub fn update(&mut self, at_time: Timestamp, bitrate: DataRate) {
        // Remove old data points from history. Since history precision is in
        // ms, add one so it is able to increase bitrate if it is off by as
        // little as 0.5ms.
        while let Some(front) = self.history.front() {
            if at_time - front.0 + TimeDelta::from_millis(1) > self.window {
                self.history.pop_front();
            } else {
                break;
            }
        }

        // Pop values higher than the new sample before pushing it.
        while let Some(back) = self.history.back() {
            if bitrate <= back.1 {
                self.history.pop_back();
            } else {
                break;
            }
        }

        self.history.push_back((at_time, bitrate));
    }

    /// Drops all history and seeds the window with a single sample.
    pub fn reset_to(&mut self, at_time: Timestamp, bitrate: DataRate) {
        self.history.clear();
        self.history.push_back((at_time, bitrate));
    }

    /// The minimum bitrate in the window, or `None` before the first sample.
    pub fn min(&self) -> Option<DataRate> {
        self.history.front().map(|entry| entry.1)
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

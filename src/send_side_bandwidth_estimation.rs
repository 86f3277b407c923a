/*
 *  Copyright (c) 2012 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

//! Send-side bandwidth estimation as described in
//! <https://tools.ietf.org/html/draft-ietf-rmcat-gcc-01>: a loss-report
//! driven additive-increase/multiplicative-decrease controller capped by an
//! externally signalled receiver estimate.

use crate::api::units::{DataRate, TimeDelta, Timestamp};
use crate::MinBitrateHistory;

/// Owns the target send bitrate for one session.
///
/// All entry points take `&mut self`, so a single instance is updated under
/// the caller's exclusive access; share across threads by wrapping the
/// instance in a `Mutex`. No operation blocks or performs I/O.
pub struct SendSideBandwidthEstimation {
    min_bitrate_history: MinBitrateHistory,

    // In-progress loss measurement, reset each time a fraction is computed.
    lost_packets_since_last_loss_update_q8: i64,
    expected_packets_since_last_loss_update: i64,

    current_bitrate: DataRate,
    min_bitrate_configured: DataRate,
    max_bitrate_configured: DataRate,

    has_decreased_since_last_fraction_loss: bool,
    last_fraction_loss: u8,

    // The max bitrate as set by the receiver. This is typically signalled
    // using a REMB RTCP message; plus_infinity means no limit was received.
    receiver_limit: DataRate,

    time_last_receiver_block: Timestamp,
    time_last_decrease: Timestamp,
    first_report_time: Timestamp,
    last_low_bitrate_log: Timestamp,
}

impl SendSideBandwidthEstimation {
    const BWE_INCREASE_INTERVAL: TimeDelta = TimeDelta::from_millis(1000);
    const BWE_DECREASE_INTERVAL: TimeDelta = TimeDelta::from_millis(300);
    const START_PHASE: TimeDelta = TimeDelta::from_millis(2000);
    const LIMIT_NUM_PACKETS: i64 = 20;
    const DEFAULT_MIN_BITRATE: DataRate = DataRate::from_bits_per_sec(10000);
    const DEFAULT_MAX_BITRATE: DataRate = DataRate::from_bits_per_sec(1000000000);
    const LOW_BITRATE_LOG_PERIOD: TimeDelta = TimeDelta::from_millis(10000);

    pub fn new(start_bitrate: DataRate) -> Self {
        assert!(start_bitrate > DataRate::zero());
        Self {
            min_bitrate_history: MinBitrateHistory::new(Self::BWE_INCREASE_INTERVAL),
            lost_packets_since_last_loss_update_q8: 0,
            expected_packets_since_last_loss_update: 0,
            current_bitrate: start_bitrate,
            min_bitrate_configured: Self::DEFAULT_MIN_BITRATE,
            max_bitrate_configured: Self::DEFAULT_MAX_BITRATE,
            has_decreased_since_last_fraction_loss: false,
            last_fraction_loss: 0,
            receiver_limit: DataRate::plus_infinity(),
            time_last_receiver_block: Timestamp::minus_infinity(),
            // Zero, not minus_infinity: a decrease cannot fire inside the
            // first BWE_DECREASE_INTERVAL of the clock epoch.
            time_last_decrease: Timestamp::zero(),
            first_report_time: Timestamp::minus_infinity(),
            last_low_bitrate_log: Timestamp::minus_infinity(),
        }
    }

    /// The current target bitrate.
    pub fn target_rate(&self) -> DataRate {
        self.current_bitrate
    }

    /// The loss fraction used for the most recent rate update, in Q8
    /// (255 ~ 99.6% loss).
    pub fn fraction_loss(&self) -> u8 {
        self.last_fraction_loss
    }

    /// Configures the clamp bounds applied to every estimate update. A min
    /// below the built-in floor is raised to it; a zero or infinite max
    /// restores the built-in default; a max below the min is raised to the
    /// min.
    pub fn set_min_max_bitrate(&mut self, min_bitrate: DataRate, max_bitrate: DataRate) {
        self.min_bitrate_configured = std::cmp::max(min_bitrate, Self::DEFAULT_MIN_BITRATE);
        if max_bitrate > DataRate::zero() && max_bitrate.is_finite() {
            self.max_bitrate_configured = std::cmp::max(self.min_bitrate_configured, max_bitrate);
        } else {
            self.max_bitrate_configured = Self::DEFAULT_MAX_BITRATE;
        }
    }

    /// Call when an RTCP message with a TMMBR or REMB arrives. A zero
    /// bandwidth clears the limit. Returns the re-clamped target bitrate.
    pub fn update_receiver_estimate(&mut self, bandwidth: DataRate) -> DataRate {
        self.receiver_limit = if bandwidth.is_zero() {
            DataRate::plus_infinity()
        } else {
            bandwidth
        };
        self.current_bitrate = std::cmp::max(
            std::cmp::min(self.current_bitrate, self.get_upper_limit()),
            self.min_bitrate_configured,
        );
        self.current_bitrate
    }

    /// Call when an RTCP receiver report block arrives. `fraction_lost` is
    /// the Q8 loss fraction from the report, `number_of_packets` the number
    /// of packets it covers. Returns the updated target bitrate.
    pub fn update_receiver_block(
        &mut self,
        fraction_lost: u8,
        number_of_packets: i64,
        at_time: Timestamp,
    ) -> DataRate {
        if self.first_report_time.is_infinite() {
            self.first_report_time = at_time;
        }

        // Check sequence number diff and weight loss report.
        if number_of_packets > 0 {
            // Accumulate reports.
            self.lost_packets_since_last_loss_update_q8 +=
                fraction_lost as i64 * number_of_packets;
            self.expected_packets_since_last_loss_update += number_of_packets;

            // Don't generate a loss rate until it can be based on enough
            // packets.
            if self.expected_packets_since_last_loss_update < Self::LIMIT_NUM_PACKETS {
                return self.current_bitrate;
            }

            self.has_decreased_since_last_fraction_loss = false;
            // Truncating division, same as the reference algorithm. Rounding
            // here would move the 2% and 10% branch boundaries.
            self.last_fraction_loss = (self.lost_packets_since_last_loss_update_q8
                / self.expected_packets_since_last_loss_update)
                as u8;

            // Reset accumulators.
            self.lost_packets_since_last_loss_update_q8 = 0;
            self.expected_packets_since_last_loss_update = 0;
        }

        self.time_last_receiver_block = at_time;
        self.update_estimate(at_time)
    }

    fn is_in_start_phase(&self, at_time: Timestamp) -> bool {
        self.first_report_time.is_infinite()
            || at_time - self.first_report_time < Self::START_PHASE
    }

    fn update_estimate(&mut self, at_time: Timestamp) -> DataRate {
        let mut bitrate = self.current_bitrate;

        // We trust the receiver estimate during the first 2 seconds if we
        // haven't had any packet loss reported, to allow startup bitrate
        // probing.
        if self.last_fraction_loss == 0
            && self.is_in_start_phase(at_time)
            && self.receiver_limit.is_finite()
            && self.receiver_limit > bitrate
        {
            self.update_target_bitrate(self.receiver_limit, at_time);
            self.min_bitrate_history
                .reset_to(at_time, self.current_bitrate);
            return self.current_bitrate;
        }

        self.min_bitrate_history.update(at_time, self.current_bitrate);

        // Only start updating bitrate after receiving receiver blocks.
        if self.time_last_receiver_block.is_finite() {
            if self.last_fraction_loss <= 5 {
                // Loss < 2%: Increase rate by 8% of the min bitrate in the
                // last BWE_INCREASE_INTERVAL.
                // Note that by remembering the bitrate over the last second
                // one can rampup one second faster than if only allowed to
                // start ramping at 8% per second rate now. E.g.:
                //   If sending a constant 100kbps it can rampup immediately
                //   to 108kbps whenever a receiver report is received with
                //   lower packet loss. If instead one would do:
                //   bitrate *= 1.08^(delta time), it would take over one
                //   second since the lower packet loss to achieve 108kbps.
                let min_in_window = self.min_bitrate_history.min().unwrap();
                bitrate =
                    DataRate::from_bits_per_sec_float(min_in_window.bps_float() * 1.08 + 0.5);

                // Add 1 kbps extra, just to make sure that we do not get
                // stuck (gives a little extra increase at low rates,
                // negligible at higher rates).
                bitrate += DataRate::from_bits_per_sec(1000);
            } else if self.last_fraction_loss <= 26 {
                // Loss between 2% - 10%: Do nothing.
            } else {
                // Loss > 10%: Limit the rate decreases to once per
                // BWE_DECREASE_INTERVAL and at most once per computed loss
                // fraction.
                if !self.has_decreased_since_last_fraction_loss
                    && (at_time - self.time_last_decrease) >= Self::BWE_DECREASE_INTERVAL
                {
                    self.time_last_decrease = at_time;

                    // Reduce rate:
                    //   newRate = rate * (1 - 0.5*lossRate);
                    //   where packetLoss = 256*lossRate;
                    bitrate = DataRate::from_bits_per_sec_float(
                        (bitrate.bps() * (512 - self.last_fraction_loss as i64)) as f64 / 512.0,
                    );
                    self.has_decreased_since_last_fraction_loss = true;
                    tracing::debug!(
                        fraction_loss = self.last_fraction_loss,
                        new_bitrate = ?bitrate,
                        "decreasing estimate on loss"
                    );
                }
            }
        }

        self.update_target_bitrate(bitrate, at_time);
        self.current_bitrate
    }

    // The configured max overrides a looser receiver limit.
    fn get_upper_limit(&self) -> DataRate {
        std::cmp::min(self.receiver_limit, self.max_bitrate_configured)
    }

    // Caps `new_bitrate` to the upper limit, then raises it to the
    // configured min, which overrides everything.
    fn update_target_bitrate(&mut self, mut new_bitrate: DataRate, at_time: Timestamp) {
        new_bitrate = std::cmp::min(new_bitrate, self.get_upper_limit());
        if new_bitrate < self.min_bitrate_configured {
            self.maybe_log_low_bitrate_warning(new_bitrate, at_time);
            new_bitrate = self.min_bitrate_configured;
        }
        self.current_bitrate = new_bitrate;
    }

    // Warns when the estimate falls below the configured min, at most once
    // per LOW_BITRATE_LOG_PERIOD.
    fn maybe_log_low_bitrate_warning(&mut self, bitrate: DataRate, at_time: Timestamp) {
        if at_time - self.last_low_bitrate_log > Self::LOW_BITRATE_LOG_PERIOD {
            tracing::warn!(
                "Estimated available bandwidth {:?} is below configured min bitrate {:?}.",
                bitrate,
                self.min_bitrate_configured
            );
            self.last_low_bitrate_log = at_time;
        }
    }
}

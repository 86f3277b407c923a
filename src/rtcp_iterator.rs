//! A cursor over a compound RTCP packet: a byte region holding zero or more
//! back-to-back sub-packets, each declaring its own total length in its
//! header. The length fields originate from the network and are validated on
//! every access.

use thiserror::Error;

/// Size of the fixed RTCP header (V/P/count, packet type, length, SSRC).
pub const RTCP_HEADER_SIZE: usize = 8;

// The 16-bit length field sits at bytes 2..4 of each sub-packet and counts
// 32-bit words minus one.
const LENGTH_FIELD_END: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RtcpIteratorError {
    /// The declared packet length is smaller than the fixed RTCP header, or
    /// there are not enough bytes left to read a length at all.
    #[error("declared RTCP packet length is smaller than the header")]
    MalformedPacket,
    /// The declared packet length runs past the end of the region, i.e. the
    /// compound packet is truncated or corrupt.
    #[error("declared RTCP packet length exceeds the remaining buffer")]
    BufferOverrun,
}

/// Not thread safe: one owner drives a single forward pass, optionally
/// interleaved with [`remove`](RtcpIterator::remove), then discards the
/// iterator. The buffer is borrowed, not copied.
///
/// This is deliberately not an [`Iterator`]: the yielded views borrow from
/// the cursor so that `remove` can compact the buffer in place.
pub struct RtcpIterator<'a> {
    buf: &'a mut [u8],
    /// Offset where the next packet is to be looked for.
    off: usize,
    /// Remaining length starting at `off`.
    len: usize,
    /// Length of the last yielded packet, 0 if none or already removed.
    last_len: usize,
}

impl<'a> RtcpIterator<'a> {
    pub fn new(buf: &'a mut [u8], off: usize, len: usize) -> Self {
        assert!(
            off.checked_add(len).is_some_and(|end| end <= buf.len()),
            "region out of bounds"
        );
        Self {
            buf,
            off,
            len,
            last_len: 0,
        }
    }

    /// The total length the packet at the cursor declares for itself, or
    /// `None` if there are not enough bytes left to read the length field.
    fn peek_length(&self) -> Option<usize> {
        if self.len < LENGTH_FIELD_END {
            return None;
        }
        let words = u16::from_be_bytes([self.buf[self.off + 2], self.buf[self.off + 3]]);
        Some((words as usize + 1) * 4)
    }

    /// True iff a complete-looking packet starts at the cursor.
    pub fn has_next(&self) -> bool {
        self.peek_length()
            .is_some_and(|pkt_len| pkt_len >= RTCP_HEADER_SIZE)
    }

    /// Yields the next packet as a view into the underlying buffer and
    /// advances past it. The view spans the packet's declared length,
    /// header included. A failed call invalidates [`remove`](Self::remove)
    /// until the next successful one.
    pub fn next(&mut self) -> Result<&[u8], RtcpIteratorError> {
        self.last_len = 0;
        let pkt_len = self
            .peek_length()
            .ok_or(RtcpIteratorError::MalformedPacket)?;
        if pkt_len < RTCP_HEADER_SIZE {
            return Err(RtcpIteratorError::MalformedPacket);
        }
        if pkt_len > self.len {
            return Err(RtcpIteratorError::BufferOverrun);
        }

        let start = self.off;
        self.last_len = pkt_len;
        self.off += pkt_len;
        self.len -= pkt_len;

        Ok(&self.buf[start..start + pkt_len])
    }

    /// Removes the packet yielded by the immediately preceding successful
    /// [`next`](RtcpIterator::next), shifting the rest of the region over it
    /// in place. Iteration continues with the packet after the removed one.
    ///
    /// The caller owns shrinking any separately tracked total length by the
    /// removed packet's size; the bytes past [`remaining`](Self::remaining)
    /// are left stale.
    ///
    /// Panics if the last `next` did not succeed or was already removed.
    pub fn remove(&mut self) {
        assert!(self.last_len != 0, "remove() without a preceding next()");

        self.buf
            .copy_within(self.off..self.off + self.len, self.off - self.last_len);
        self.off -= self.last_len;

        self.last_len = 0;
    }

    /// Current cursor offset into the buffer.
    pub fn offset(&self) -> usize {
        self.off
    }

    /// Bytes left to iterate over.
    pub fn remaining(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// Appends a minimal RTCP packet of `len` bytes (a multiple of 4, at
    /// least 8) with the given packet type and a recognizable payload fill.
    fn push_packet(buf: &mut Vec<u8>, pt: u8, len: usize, fill: u8) {
        assert!(len >= RTCP_HEADER_SIZE && len % 4 == 0);
        let words = (len / 4 - 1) as u16;
        buf.push(0x80);
        buf.push(pt);
        buf.extend_from_slice(&words.to_be_bytes());
        buf.resize(buf.len() + len - 4, fill);
    }

    #[test]
    fn yields_each_packet_in_order() {
        let mut buf = Vec::new();
        push_packet(&mut buf, 200, 28, 0xaa);
        push_packet(&mut buf, 201, 8, 0xbb);
        push_packet(&mut buf, 202, 16, 0xcc);
        let total = buf.len();

        let mut iter = RtcpIterator::new(&mut buf, 0, total);

        assert!(iter.has_next());
        let first = iter.next().unwrap();
        assert_eq!(first.len(), 28);
        assert_eq!(first[1], 200);

        let second = iter.next().unwrap();
        assert_eq!(second.len(), 8);
        assert_eq!(second[1], 201);

        let third = iter.next().unwrap();
        assert_eq!(third.len(), 16);
        assert_eq!(third[1], 202);

        assert!(!iter.has_next());
        assert_eq!(iter.remaining(), 0);
    }

    #[test]
    fn respects_region_offset_and_length() {
        let mut buf = vec![0xff; 4];
        push_packet(&mut buf, 200, 8, 0xaa);
        let end = buf.len();
        buf.extend_from_slice(&[0xff; 4]);

        let mut iter = RtcpIterator::new(&mut buf, 4, end - 4);
        let pkt = iter.next().unwrap();
        assert_eq!(pkt.len(), 8);
        assert_eq!(pkt[1], 200);
        assert!(!iter.has_next());
    }

    #[test]
    fn empty_region_has_no_packets() {
        let mut buf = Vec::new();
        let mut iter = RtcpIterator::new(&mut buf, 0, 0);
        assert!(!iter.has_next());
        assert_eq!(iter.next(), Err(RtcpIteratorError::MalformedPacket));
    }

    #[test]
    fn undersized_declared_length_is_malformed() {
        // Length field of 0 declares a 4 byte packet, below the header size.
        let mut buf = vec![0x80, 200, 0x00, 0x00, 0x11, 0x22, 0x33, 0x44];
        let total = buf.len();
        let mut iter = RtcpIterator::new(&mut buf, 0, total);
        assert!(!iter.has_next());
        assert_eq!(iter.next(), Err(RtcpIteratorError::MalformedPacket));
    }

    #[test]
    fn truncated_packet_is_a_buffer_overrun() {
        let mut buf = Vec::new();
        push_packet(&mut buf, 200, 8, 0xaa);
        push_packet(&mut buf, 201, 16, 0xbb);
        // Lop 4 bytes off the last packet.
        let total = buf.len() - 4;
        buf.truncate(total);

        let mut iter = RtcpIterator::new(&mut buf, 0, total);
        assert!(iter.next().is_ok());
        // has_next still reports true: the declared length looks valid.
        assert!(iter.has_next());
        assert_eq!(iter.next(), Err(RtcpIteratorError::BufferOverrun));
    }

    #[test]
    fn overrun_leaves_cursor_untouched() {
        let mut buf = Vec::new();
        push_packet(&mut buf, 200, 16, 0xaa);
        let total = 8;
        buf.truncate(total);

        let mut iter = RtcpIterator::new(&mut buf, 0, total);
        assert_eq!(iter.next(), Err(RtcpIteratorError::BufferOverrun));
        assert_eq!(iter.offset(), 0);
        assert_eq!(iter.remaining(), total);
    }

    #[test]
    fn remove_compacts_the_middle_packet() {
        let mut buf = Vec::new();
        push_packet(&mut buf, 200, 28, 0xaa);
        push_packet(&mut buf, 201, 12, 0xbb);
        push_packet(&mut buf, 202, 16, 0xcc);
        let total = buf.len();

        let removed_len;
        {
            let mut iter = RtcpIterator::new(&mut buf, 0, total);
            iter.next().unwrap();
            let second = iter.next().unwrap();
            removed_len = second.len();
            iter.remove();

            // Continued iteration sees the third packet, now shifted.
            let third = iter.next().unwrap();
            assert_eq!(third.len(), 16);
            assert_eq!(third[1], 202);
            assert!(!iter.has_next());
        }

        // A fresh walk over the shrunk region yields the first and third
        // packets back to back, the third starting 12 bytes earlier.
        let mut iter = RtcpIterator::new(&mut buf, 0, total - removed_len);
        let first = iter.next().unwrap();
        assert_eq!(first[1], 200);
        let third = iter.next().unwrap();
        assert_eq!(third[1], 202);
        assert!(!iter.has_next());
        assert_eq!(&buf[28..30], &[0x80, 202]);
    }

    #[test]
    fn remove_of_last_packet_only_clears_state() {
        let mut buf = Vec::new();
        push_packet(&mut buf, 200, 8, 0xaa);
        push_packet(&mut buf, 201, 8, 0xbb);
        let total = buf.len();

        let mut iter = RtcpIterator::new(&mut buf, 0, total);
        iter.next().unwrap();
        iter.next().unwrap();
        iter.remove();
        assert!(!iter.has_next());
        assert_eq!(iter.remaining(), 0);
    }

    #[test]
    #[should_panic(expected = "remove() without a preceding next()")]
    fn remove_before_next_panics() {
        let mut buf = Vec::new();
        push_packet(&mut buf, 200, 8, 0xaa);
        let total = buf.len();

        let mut iter = RtcpIterator::new(&mut buf, 0, total);
        iter.remove();
    }

    #[test]
    #[should_panic(expected = "remove() without a preceding next()")]
    fn remove_after_failed_next_panics() {
        let mut buf = Vec::new();
        push_packet(&mut buf, 200, 8, 0xaa);
        push_packet(&mut buf, 201, 16, 0xbb);
        // Leave only half of the second packet.
        let total = buf.len() - 8;
        buf.truncate(total);

        let mut iter = RtcpIterator::new(&mut buf, 0, total);
        iter.next().unwrap();
        assert_eq!(iter.next(), Err(RtcpIteratorError::BufferOverrun));
        // The failed next must not leave the first packet removable.
        iter.remove();
    }

    #[test]
    #[should_panic(expected = "remove() without a preceding next()")]
    fn double_remove_panics() {
        let mut buf = Vec::new();
        push_packet(&mut buf, 200, 8, 0xaa);
        push_packet(&mut buf, 201, 8, 0xbb);
        let total = buf.len();

        let mut iter = RtcpIterator::new(&mut buf, 0, total);
        iter.next().unwrap();
        iter.remove();
        iter.remove();
    }

    #[test]
    #[should_panic(expected = "region out of bounds")]
    fn oversized_region_panics() {
        let mut buf = vec![0u8; 8];
        RtcpIterator::new(&mut buf, 4, 8);
    }
}

//! Framed packet ring buffer.
//!
//! The encoder→broca channel: a byte ring with a framing discipline.
//! Writers append a trivially-copied header followed by its payload;
//! readers take a [`PacketRead`] cursor that refuses to bleed into the
//! next packet. "Direct" reads bypass framing for brocas that want a raw
//! byte stream, transparently skipping out-of-band packets.
//!
//! The header layout is native-endian machine words. It never leaves the
//! process and is not a persistence format.

use crate::pipeline::ring_buffer::RingBuffer;

/// Packet flag bits. Flags are advisory: they control how brocas
/// interpret the payload, not how the buffer stores it.
pub mod flags {
    /// First packet of a track (including container headers).
    pub const START_OF_TRACK: u32 = 1;
    /// Not part of the audio byte stream; direct reads skip it.
    pub const OUT_OF_BAND: u32 = 2;
    /// Payload is an `OOBC` serialized original command.
    pub const ORIGINAL_COMMAND: u32 = 4;
    /// Payload is an `OOBM` metadata record set.
    pub const METADATA: u32 = 8;
}

/// Fixed header preceding every packet payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketHeader {
    /// Payload length in bytes.
    pub data_size: usize,
    /// Number of audio frames the payload covers (0 for out-of-band).
    pub frame_count: usize,
    /// Bitset over [`flags`].
    pub flags: u32,
}

const WORD: usize = std::mem::size_of::<usize>();
/// Serialized header size.
pub const HEADER_SIZE: usize = 2 * WORD + 4;

impl PacketHeader {
    fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut raw = [0u8; HEADER_SIZE];
        raw[..WORD].copy_from_slice(&self.data_size.to_ne_bytes());
        raw[WORD..2 * WORD].copy_from_slice(&self.frame_count.to_ne_bytes());
        raw[2 * WORD..].copy_from_slice(&self.flags.to_ne_bytes());
        raw
    }

    fn from_bytes(raw: &[u8; HEADER_SIZE]) -> Self {
        let mut word = [0u8; WORD];
        word.copy_from_slice(&raw[..WORD]);
        let data_size = usize::from_ne_bytes(word);
        word.copy_from_slice(&raw[WORD..2 * WORD]);
        let frame_count = usize::from_ne_bytes(word);
        let mut tail = [0u8; 4];
        tail.copy_from_slice(&raw[2 * WORD..]);
        Self {
            data_size,
            frame_count,
            flags: u32::from_ne_bytes(tail),
        }
    }
}

/// Byte ring buffer carrying framed packets.
pub struct PacketRingBuffer {
    bytes: RingBuffer<u8>,
}

impl PacketRingBuffer {
    /// Creates a packet buffer over `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: RingBuffer::new(capacity),
        }
    }

    /// Appends one packet: header, then payload.
    ///
    /// With a single writer per buffer this is atomic as far as readers
    /// can observe: a reader that got the header will block until the
    /// payload bytes arrive rather than see a gap.
    pub fn write_packet(&self, flags: u32, frame_count: usize, data: &[u8]) {
        let header = PacketHeader {
            data_size: data.len(),
            frame_count,
            flags,
        };
        self.bytes.write_full(&header.to_bytes());
        self.bytes.write_full(data);
    }

    /// Blocks for the next packet header. Returns `None` only when the
    /// buffer is closed and drained.
    pub fn read_packet(&self) -> Option<PacketRead<'_>> {
        let mut raw = [0u8; HEADER_SIZE];
        if self.bytes.read_full(&mut raw) < HEADER_SIZE {
            return None;
        }
        let header = PacketHeader::from_bytes(&raw);
        Some(PacketRead {
            buffer: self,
            left: header.data_size,
            header,
        })
    }

    /// An exhausted cursor, used to seed direct-read state.
    pub fn drained_cursor(&self) -> PacketRead<'_> {
        PacketRead {
            buffer: self,
            left: 0,
            header: PacketHeader::default(),
        }
    }

    /// Byte-stream read across packet boundaries, skipping out-of-band
    /// packets. Non-blocking within the current packet, though advancing
    /// to the next packet waits for its header. `cursor` carries the
    /// position within the current packet between calls.
    pub fn read_direct_partial<'a>(
        &'a self,
        cursor: &mut PacketRead<'a>,
        dst: &mut [u8],
    ) -> usize {
        while !cursor.has_data() {
            let Some(next) = self.read_packet() else {
                return 0;
            };
            *cursor = next;
            if cursor.header.flags & flags::OUT_OF_BAND != 0 {
                cursor.skip_full();
            }
        }
        cursor.read_partial(dst)
    }

    /// Byte-stream read across packet boundaries, skipping out-of-band
    /// packets. Blocks if nothing is available; otherwise returns what is
    /// present in the current packet.
    pub fn read_direct_some<'a>(&'a self, cursor: &mut PacketRead<'a>, dst: &mut [u8]) -> usize {
        while !cursor.has_data() {
            let Some(next) = self.read_packet() else {
                return 0;
            };
            *cursor = next;
            if cursor.header.flags & flags::OUT_OF_BAND != 0 {
                cursor.skip_full();
            }
        }
        cursor.read_some(dst)
    }

    /// Byte-stream read that blocks until `dst` is full or the buffer is
    /// closed, crossing packet boundaries and skipping out-of-band
    /// packets.
    pub fn read_direct_full<'a>(&'a self, cursor: &mut PacketRead<'a>, dst: &mut [u8]) -> usize {
        let mut total = 0;
        loop {
            if cursor.header.flags & flags::OUT_OF_BAND != 0 {
                cursor.skip_full();
            } else {
                let n = cursor.read_full(&mut dst[total..]);
                total += n;
                if total == dst.len() {
                    break;
                }
            }

            let Some(next) = self.read_packet() else {
                break;
            };
            *cursor = next;
        }
        total
    }

    /// Closes the underlying byte ring.
    pub fn close(&self) {
        self.bytes.close();
    }

    /// True iff closed and drained.
    pub fn closed_to_reads(&self) -> bool {
        self.bytes.closed_to_reads()
    }

    /// True iff closed.
    pub fn closed_to_writes(&self) -> bool {
        self.bytes.closed_to_writes()
    }
}

/// Cursor over one packet's payload.
///
/// Bounded by the packet's `data_size`; reads past the payload end return
/// zero instead of bleeding into the next header.
pub struct PacketRead<'a> {
    buffer: &'a PacketRingBuffer,
    left: usize,
    /// The packet's header.
    pub header: PacketHeader,
}

impl PacketRead<'_> {
    /// True while payload bytes remain and the buffer can still yield
    /// them.
    pub fn has_data(&self) -> bool {
        self.left > 0 && !self.buffer.closed_to_reads()
    }

    /// Bytes of this packet not yet consumed.
    pub fn remaining(&self) -> usize {
        self.left
    }

    fn clamp(&self, n: usize) -> usize {
        n.min(self.left)
    }

    fn consumed(&mut self, n: usize) {
        self.left -= n.min(self.left);
    }

    /// Non-blocking read of this packet's bytes.
    pub fn read_partial(&mut self, dst: &mut [u8]) -> usize {
        let want = self.clamp(dst.len());
        if want == 0 {
            return 0;
        }
        let n = self.buffer.bytes.read_partial(&mut dst[..want]);
        self.consumed(n);
        n
    }

    /// Blocks until at least one byte of this packet is available or the
    /// buffer closes; never reads past the packet.
    pub fn read_some(&mut self, dst: &mut [u8]) -> usize {
        let want = self.clamp(dst.len());
        if want == 0 {
            return 0;
        }
        let n = self.buffer.bytes.read_some(&mut dst[..want]);
        self.consumed(n);
        n
    }

    /// Blocks until `dst` is full, the packet is exhausted, or the buffer
    /// closes.
    pub fn read_full(&mut self, dst: &mut [u8]) -> usize {
        let want = self.clamp(dst.len());
        if want == 0 {
            return 0;
        }
        let n = self.buffer.bytes.read_full(&mut dst[..want]);
        self.consumed(n);
        n
    }

    /// Discards the rest of this packet.
    pub fn skip_full(&mut self) {
        let n = self.buffer.bytes.skip_full(self.left);
        self.consumed(n);
    }

    /// Reads the whole remaining payload into a vector.
    pub fn read_to_vec(&mut self) -> Vec<u8> {
        let mut out = vec![0u8; self.left];
        let n = self.read_full(&mut out);
        out.truncate(n);
        out
    }
}

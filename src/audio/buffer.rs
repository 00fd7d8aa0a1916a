//! Bounded take buffer for captured answer audio.
//!
//! A drill answer is short, but the microphone may be left open for much
//! longer than intended (a forgotten pause, a slow recognizer).  The
//! [`RingBuffer`] caps memory by keeping only the most recent `capacity`
//! samples; older audio is overwritten.
//!
//! ```rust
//! use speech_drill::audio::RingBuffer;
//!
//! let mut take = RingBuffer::with_duration(1, 4); // 1 s at 4 Hz
//! take.push_slice(&[0.1, 0.2, 0.3, 0.4, 0.5]);
//! assert_eq!(take.drain(), vec![0.2, 0.3, 0.4, 0.5]);
//! ```

pub struct RingBuffer {
    buf: Vec<f32>,
    /// Next write slot.
    head: usize,
    len: usize,
}

impl RingBuffer {
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "RingBuffer capacity must be > 0");
        Self {
            buf: vec![0.0; capacity],
            head: 0,
            len: 0,
        }
    }

    /// Buffer holding `secs` seconds of mono audio at `sample_rate`.
    pub fn with_duration(secs: u32, sample_rate: u32) -> Self {
        Self::new((secs as usize * sample_rate as usize).max(1))
    }

    pub fn push_slice(&mut self, data: &[f32]) {
        let cap = self.buf.len();
        // Only the tail can survive when `data` alone overflows the buffer.
        let data = if data.len() > cap {
            &data[data.len() - cap..]
        } else {
            data
        };
        for &sample in data {
            self.buf[self.head] = sample;
            self.head = (self.head + 1) % cap;
        }
        self.len = (self.len + data.len()).min(cap);
    }

    /// Samples in chronological order, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<f32> {
        let cap = self.buf.len();
        let start = (self.head + cap - self.len) % cap;
        let out = (0..self.len).map(|i| self.buf[(start + i) % cap]).collect();
        self.clear();
        out
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
}

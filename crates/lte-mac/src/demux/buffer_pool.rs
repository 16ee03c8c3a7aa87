use lte_saps::PayloadHandle;

struct Slot {
    data: Vec<u8>,
    generation: u32,
    in_use: bool,
}

/// Fixed set of payload buffers handed to the PHY for decoding. A slot belongs to
/// whoever holds its handle until it is released; stale handles are rejected.
pub struct BufferPool {
    slots: Vec<Slot>,
    max_len: usize,
}

impl BufferPool {
    pub fn new(nof_buffers: usize, max_len: usize) -> Self {
        let slots = (0..nof_buffers)
            .map(|_| Slot {
                data: Vec::new(),
                generation: 0,
                in_use: false,
            })
            .collect();
        Self { slots, max_len }
    }

    /// Zeroed buffer of `len` bytes, None if `len` is too large or the pool is exhausted
    pub fn request(&mut self, len: usize) -> Option<PayloadHandle> {
        if len > self.max_len {
            tracing::error!("Requested buffer of {} bytes exceeds maximum PDU length {}", len, self.max_len);
            return None;
        }
        let Some((idx, slot)) = self.slots.iter_mut().enumerate().find(|(_, s)| !s.in_use) else {
            tracing::error!("Buffer pool exhausted ({} buffers in use)", self.slots.len());
            return None;
        };
        slot.in_use = true;
        slot.data.clear();
        slot.data.resize(len, 0);
        Some(PayloadHandle {
            slot: idx as u32,
            generation: slot.generation,
        })
    }

    fn slot(&self, h: PayloadHandle) -> Option<&Slot> {
        self.slots
            .get(h.slot as usize)
            .filter(|s| s.in_use && s.generation == h.generation)
    }

    pub fn get(&self, h: PayloadHandle) -> Option<&[u8]> {
        self.slot(h).map(|s| s.data.as_slice())
    }

    pub fn get_mut(&mut self, h: PayloadHandle) -> Option<&mut [u8]> {
        self.slots
            .get_mut(h.slot as usize)
            .filter(|s| s.in_use && s.generation == h.generation)
            .map(|s| s.data.as_mut_slice())
    }

    /// Returns the slot to the pool. False if the handle was stale.
    pub fn release(&mut self, h: PayloadHandle) -> bool {
        match self.slots.get_mut(h.slot as usize) {
            Some(s) if s.in_use && s.generation == h.generation => {
                s.in_use = false;
                s.generation = s.generation.wrapping_add(1);
                true
            }
            _ => {
                tracing::warn!("Release of stale payload handle {:?}", h);
                false
            }
        }
    }

    pub fn nof_available(&self) -> usize {
        self.slots.iter().filter(|s| !s.in_use).count()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

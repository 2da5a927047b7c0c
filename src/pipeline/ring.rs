/// Fixed backing array addressed modulo its capacity. Pushing into a full
/// buffer doubles the array once rather than failing.
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push_back(&mut self, value: T) {
        if self.len == self.capacity() {
            self.grow();
        }
        let tail = (self.head + self.len) % self.capacity();
        self.slots[tail] = Some(value);
        self.len += 1;
    }

    pub fn pop_front(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let value = self.slots[self.head].take();
        self.head = (self.head + 1) % self.capacity();
        self.len -= 1;
        value
    }

    pub fn back_mut(&mut self) -> Option<&mut T> {
        if self.len == 0 {
            return None;
        }
        let index = (self.head + self.len - 1) % self.capacity();
        self.slots[index].as_mut()
    }

    fn grow(&mut self) {
        let old_capacity = self.capacity();
        let mut slots: Vec<Option<T>> = (0..old_capacity * 2).map(|_| None).collect();
        for (offset, slot) in slots.iter_mut().take(self.len).enumerate() {
            *slot = self.slots[(self.head + offset) % old_capacity].take();
        }
        self.slots = slots;
        self.head = 0;
        tracing::debug!(
            old_capacity,
            new_capacity = self.capacity(),
            "ring buffer full; grew backing array"
        );
    }
}

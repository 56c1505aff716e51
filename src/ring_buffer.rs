//! Fixed-capacity double-ended queue backing the pool registries

use crate::errors::{PoolError, PoolResult};

/// A bounded ring buffer with O(1) operations at both ends.
///
/// Slots are pre-allocated at construction and never grow. Besides the usual
/// deque operations it supports removing an arbitrary element in O(1) by
/// moving the tail element into the vacated slot, which does not preserve
/// ordering.
///
/// # Examples
///
/// ```
/// use async_resource_pool::RingBuffer;
///
/// let mut buffer = RingBuffer::new(3);
/// buffer.push(1).unwrap();
/// buffer.push(2).unwrap();
/// buffer.unshift(0).unwrap();
///
/// assert!(buffer.push(3).is_err());
/// assert_eq!(buffer.shift(), Some(0));
/// assert_eq!(buffer.pop(), Some(2));
/// assert_eq!(buffer.size(), 1);
/// ```
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    head: usize,
    size: usize,
}

impl<T> RingBuffer<T> {
    /// Create an empty buffer holding at most `capacity` elements
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            size: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_full(&self) -> bool {
        self.size == self.capacity()
    }

    /// Append at the tail
    pub fn push(&mut self, value: T) -> PoolResult<()> {
        if self.is_full() {
            return Err(PoolError::BufferFull);
        }
        let tail = self.physical(self.size);
        self.slots[tail] = Some(value);
        self.size += 1;
        Ok(())
    }

    /// Remove from the tail
    pub fn pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let tail = self.physical(self.size - 1);
        self.size -= 1;
        self.slots[tail].take()
    }

    /// Prepend at the head
    pub fn unshift(&mut self, value: T) -> PoolResult<()> {
        if self.is_full() {
            return Err(PoolError::BufferFull);
        }
        self.head = self.physical(self.capacity() - 1);
        self.slots[self.head] = Some(value);
        self.size += 1;
        Ok(())
    }

    /// Remove from the head
    pub fn shift(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let value = self.slots[self.head].take();
        self.head = self.physical(1);
        self.size -= 1;
        value
    }

    /// First element, head to tail, matching the predicate
    pub fn find<P>(&self, mut predicate: P) -> Option<&T>
    where
        P: FnMut(&T) -> bool,
    {
        self.iter().find(|value| predicate(value))
    }

    /// Mutable access to the first element matching the predicate
    pub fn find_mut<P>(&mut self, mut predicate: P) -> Option<&mut T>
    where
        P: FnMut(&T) -> bool,
    {
        let index = self.position(|value| predicate(value))?;
        let slot = self.physical(index);
        self.slots[slot].as_mut()
    }

    /// Number of elements matching the predicate
    pub fn count<P>(&self, mut predicate: P) -> usize
    where
        P: FnMut(&T) -> bool,
    {
        self.iter().filter(|value| predicate(value)).count()
    }

    /// Visit every element from head to tail
    pub fn for_each<F>(&self, f: F)
    where
        F: FnMut(&T),
    {
        self.iter().for_each(f);
    }

    /// Visit every element mutably from head to tail
    pub fn for_each_mut<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut T),
    {
        for index in 0..self.size {
            let slot = self.physical(index);
            if let Some(value) = self.slots[slot].as_mut() {
                f(value);
            }
        }
    }

    /// Iterate from head to tail
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.size).filter_map(move |index| self.slots[self.physical(index)].as_ref())
    }

    /// Remove the first element matching the predicate in O(1).
    ///
    /// At the head this is [`shift`](Self::shift), at the tail
    /// [`pop`](Self::pop). Anywhere else the tail element is moved into the
    /// freed slot, so ordering is not preserved.
    pub fn fast_remove_by<P>(&mut self, predicate: P) -> Option<T>
    where
        P: FnMut(&T) -> bool,
    {
        let index = self.position(predicate)?;
        if index == 0 {
            return self.shift();
        }
        if index == self.size - 1 {
            return self.pop();
        }
        let slot = self.physical(index);
        let tail = self.pop();
        std::mem::replace(&mut self.slots[slot], tail)
    }

    fn position<P>(&self, mut predicate: P) -> Option<usize>
    where
        P: FnMut(&T) -> bool,
    {
        (0..self.size).find(|&index| {
            self.slots[self.physical(index)]
                .as_ref()
                .is_some_and(&mut predicate)
        })
    }

    fn physical(&self, offset: usize) -> usize {
        (self.head + offset) % self.capacity()
    }
}

impl<T: PartialEq> RingBuffer<T> {
    /// Remove an element equal to `value`; returns whether one was found
    pub fn fast_remove(&mut self, value: &T) -> bool {
        self.fast_remove_by(|candidate| candidate == value).is_some()
    }
}

//! Ping-pong buffer pair

/// Two buffers with fixed read/write roles that swap after each step
///
/// Kernels read [`current`](Self::current) and write [`next_mut`](Self::next_mut);
/// [`swap`](Self::swap) then promotes the written buffer.
#[derive(Debug)]
pub struct DoubleBuffer<T> {
    buffers: [T; 2],
    front: usize,
}

impl<T> DoubleBuffer<T> {
    /// Build from the initial `current` buffer and a scratch `next` buffer
    pub fn new(current: T, next: T) -> Self {
        Self {
            buffers: [current, next],
            front: 0,
        }
    }

    /// Buffer holding the latest complete state
    pub fn current(&self) -> &T {
        &self.buffers[self.front]
    }

    /// Mutable access to the latest state, for in-place stages
    pub fn current_mut(&mut self) -> &mut T {
        &mut self.buffers[self.front]
    }

    /// Buffer the next step writes into
    pub fn next_mut(&mut self) -> &mut T {
        &mut self.buffers[1 - self.front]
    }

    /// Read `current` while writing `next`
    pub fn pair_mut(&mut self) -> (&T, &mut T) {
        let (a, b) = self.buffers.split_at_mut(1);
        if self.front == 0 {
            (&a[0], &mut b[0])
        } else {
            (&b[0], &mut a[0])
        }
    }

    /// Promote `next` to `current`
    pub fn swap(&mut self) {
        self.front = 1 - self.front;
    }

    /// Consume the pair, keeping the current buffer
    pub fn into_current(self) -> T {
        let [a, b] = self.buffers;
        if self.front == 0 {
            a
        } else {
            b
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_roles() {
        let mut buf = DoubleBuffer::new(vec![1], vec![0]);
        {
            let (cur, next) = buf.pair_mut();
            next[0] = cur[0] + 1;
        }
        assert_eq!(buf.current(), &vec![1]);
        buf.swap();
        assert_eq!(buf.current(), &vec![2]);

        let (cur, next) = buf.pair_mut();
        next[0] = cur[0] * 10;
        buf.swap();
        assert_eq!(buf.into_current(), vec![20]);
    }

    #[test]
    fn test_current_mut_is_front() {
        let mut buf = DoubleBuffer::new(0, 0);
        buf.swap();
        *buf.current_mut() = 5;
        *buf.next_mut() = 9;
        assert_eq!(*buf.current(), 5);
        buf.swap();
        assert_eq!(*buf.current(), 9);
    }
}

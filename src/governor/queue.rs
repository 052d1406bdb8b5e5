use std::collections::VecDeque;

/// Stable priority queue: higher priorities first, arrival order within a level
#[derive(Debug)]
pub struct PriorityQueue<T> {
    items: VecDeque<(u8, T)>,
}

impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    /// Insert before the first item with a strictly lower priority.
    ///
    /// Returns the position the item landed at.
    pub fn push(&mut self, priority: u8, item: T) -> usize {
        let position = self
            .items
            .iter()
            .position(|(existing, _)| *existing < priority)
            .unwrap_or(self.items.len());
        self.items.insert(position, (priority, item));
        position
    }

    pub fn pop(&mut self) -> Option<(u8, T)> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Remove every item, head first
    pub fn drain(&mut self) -> impl Iterator<Item = (u8, T)> + '_ {
        self.items.drain(..)
    }

    /// Remove the first item matching `predicate`, keeping the order of the rest
    pub fn remove_first(&mut self, predicate: impl Fn(&T) -> bool) -> Option<(u8, T)> {
        let position = self.items.iter().position(|(_, item)| predicate(item))?;
        self.items.remove(position)
    }

    pub fn priorities(&self) -> impl Iterator<Item = u8> + '_ {
        self.items.iter().map(|(priority, _)| *priority)
    }
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_higher_priority_goes_first() {
        let mut queue = PriorityQueue::new();
        queue.push(1, "low");
        queue.push(3, "high");
        queue.push(2, "medium");

        let order: Vec<&str> = std::iter::from_fn(|| queue.pop().map(|(_, v)| v)).collect();
        assert_eq!(order, vec!["high", "medium", "low"]);
    }

    #[test]
    fn test_ties_keep_arrival_order() {
        let mut queue = PriorityQueue::new();
        assert_eq!(queue.push(2, "a"), 0);
        assert_eq!(queue.push(1, "b"), 1);
        assert_eq!(queue.push(2, "c"), 1);
        assert_eq!(queue.push(2, "d"), 2);
        assert_eq!(queue.push(1, "e"), 4);

        let order: Vec<&str> = std::iter::from_fn(|| queue.pop().map(|(_, v)| v)).collect();
        assert_eq!(order, vec!["a", "c", "d", "b", "e"]);
    }

    #[test]
    fn test_dequeue_is_non_increasing() {
        let mut queue = PriorityQueue::new();
        let priorities = [1u8, 3, 2, 2, 1, 3, 1, 2, 3, 3, 1];
        for (seq, priority) in priorities.iter().enumerate() {
            queue.push(*priority, seq);
        }

        let popped: Vec<(u8, usize)> = std::iter::from_fn(|| queue.pop()).collect();
        for pair in popped.windows(2) {
            let ((p1, s1), (p2, s2)) = (pair[0], pair[1]);
            assert!(p1 > p2 || (p1 == p2 && s1 < s2), "{:?}", popped);
        }
    }

    #[test]
    fn test_remove_first_keeps_order() {
        let mut queue = PriorityQueue::new();
        queue.push(1, 'a');
        queue.push(2, 'b');
        queue.push(1, 'c');

        assert_eq!(queue.remove_first(|v| *v == 'a'), Some((1, 'a')));
        assert_eq!(queue.remove_first(|v| *v == 'z'), None);
        let rest: Vec<char> = queue.drain().map(|(_, v)| v).collect();
        assert_eq!(rest, vec!['b', 'c']);
    }

    #[test]
    fn test_drain_empties_queue() {
        let mut queue = PriorityQueue::new();
        queue.push(1, 10);
        queue.push(2, 20);

        assert_eq!(queue.priorities().collect::<Vec<_>>(), vec![2, 1]);
        let drained: Vec<i32> = queue.drain().map(|(_, v)| v).collect();
        assert_eq!(drained, vec![20, 10]);
        assert!(queue.is_empty());
    }
}

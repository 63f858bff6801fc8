#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Link {
    prev: usize,
    next: usize,
}

/// Ring of active queue indices with a round-robin cursor.
///
/// Links live in a slot per queue index, so a queue can be a member at most
/// once and removal is O(1).
#[derive(Debug, Clone, Default)]
pub struct ActiveList {
    links: Vec<Option<Link>>,
    cursor: Option<usize>,
    len: usize,
}

impl ActiveList {
    pub fn with_slots(slots: usize) -> Self {
        Self {
            links: vec![None; slots],
            cursor: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, idx: usize) -> bool {
        self.links.get(idx).is_some_and(Option::is_some)
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn next_of(&self, idx: usize) -> Option<usize> {
        self.links.get(idx).copied().flatten().map(|link| link.next)
    }

    /// Inserts `idx` just behind the cursor, i.e. last in the current round.
    /// An empty ring makes `idx` its sole member and the cursor.
    pub fn push_tail(&mut self, idx: usize) {
        if idx >= self.links.len() || self.contains(idx) {
            return;
        }
        match self.cursor {
            None => {
                self.links[idx] = Some(Link {
                    prev: idx,
                    next: idx,
                });
                self.cursor = Some(idx);
            }
            Some(head) => {
                let Some(head_link) = self.links[head] else {
                    return;
                };
                let tail = head_link.prev;
                self.links[idx] = Some(Link {
                    prev: tail,
                    next: head,
                });
                if let Some(link) = self.links[tail].as_mut() {
                    link.next = idx;
                }
                if let Some(link) = self.links[head].as_mut() {
                    link.prev = idx;
                }
            }
        }
        self.len += 1;
    }

    /// Unlinks `idx` and returns its successor, or `None` once the ring is
    /// empty. If `idx` held the cursor, the cursor moves to the successor.
    pub fn remove(&mut self, idx: usize) -> Option<usize> {
        let link = self.links.get_mut(idx)?.take()?;
        self.len -= 1;
        if self.len == 0 {
            self.cursor = None;
            return None;
        }
        if let Some(prev) = self.links[link.prev].as_mut() {
            prev.next = link.next;
        }
        if let Some(next) = self.links[link.next].as_mut() {
            next.prev = link.prev;
        }
        if self.cursor == Some(idx) {
            self.cursor = Some(link.next);
        }
        Some(link.next)
    }

    /// Moves the cursor one member forward and returns the new cursor.
    pub fn advance(&mut self) -> Option<usize> {
        let next = self.next_of(self.cursor?)?;
        self.cursor = Some(next);
        Some(next)
    }

    /// Members in service order, starting at the cursor.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        let mut at = self.cursor;
        (0..self.len).map_while(move |_| {
            let idx = at?;
            at = self.next_of(idx);
            Some(idx)
        })
    }

    pub fn clear(&mut self) {
        self.links.iter_mut().for_each(|link| *link = None);
        self.cursor = None;
        self.len = 0;
    }
}

//! Turn numbering over the scanned window of the message list.
//!
//! A turn starts at every step-start marker. Only messages from the last
//! host compaction marker onward are scanned; turns counted before that
//! compaction carry over as an offset so numbering never goes backwards.

use crate::Message;

/// Turn number of every part in the scanned window.
#[derive(Debug, Clone, Default)]
pub struct Turns {
    /// Index of the first scanned message.
    pub start: usize,
    /// Turn of the last boundary seen (the highest turn in the window).
    pub last: u32,
    per_part: Vec<Vec<u32>>,
}

impl Turns {
    /// Number the parts of `messages[start..]`, continuing from `offset`.
    pub fn compute(messages: &[Message], offset: u32) -> Self {
        let start = scan_start(messages);
        let mut turn = offset;
        let per_part = messages[start..]
            .iter()
            .map(|msg| {
                msg.parts
                    .iter()
                    .map(|part| {
                        if part.is_turn_boundary() {
                            turn += 1;
                        }
                        turn
                    })
                    .collect()
            })
            .collect();
        Self {
            start,
            last: turn,
            per_part,
        }
    }

    /// Turn of part `part_index` in message `message_index` (absolute index).
    pub fn turn(&self, message_index: usize, part_index: usize) -> u32 {
        message_index
            .checked_sub(self.start)
            .and_then(|i| self.per_part.get(i))
            .and_then(|parts| parts.get(part_index))
            .copied()
            .unwrap_or(self.last)
    }
}

/// Index of the last message carrying a compaction marker, or 0.
pub fn scan_start(messages: &[Message]) -> usize {
    messages
        .iter()
        .rposition(Message::is_compaction_boundary)
        .unwrap_or(0)
}

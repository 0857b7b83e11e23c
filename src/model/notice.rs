//! Accumulated free-text notices attached to a reservation, per spec §7
//! ("failures surface in ... the reservation's `get_notices()`").
//!
//! Grounded on `fabric_cf/actor/core/util/notice.py`: an append-only log,
//! not a structured event stream — `UpdateData` (see
//! `reservation::update_data`) is the structured counterpart used for
//! outbound RPC.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Notice {
    lines: Vec<String>,
}

impl Notice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn as_text(&self) -> String {
        self.lines.join("\n")
    }
}

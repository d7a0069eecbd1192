use std::collections::VecDeque;

use hashbrown::HashMap;

use crate::types::LocalPlaylistId;

/// Per-playlist FIFO of parked operations.
pub type PlaylistQueue<T> = HashMap<LocalPlaylistId, VecDeque<T>>;

//! Named playlists. Entries are copies of history records, so removing a
//! playlist entry never touches the file and history deletions may leave
//! entries pointing at files that are gone.

use serde::Serialize;

use crate::error::GrabError;
use crate::registry::ArtifactRecord;

pub const DEFAULT_PLAYLIST: &str = "Favorites";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Playlist {
    pub name: String,
    pub entries: Vec<ArtifactRecord>,
}

#[derive(Debug)]
pub struct Playlists {
    lists: Vec<Playlist>,
}

impl Default for Playlists {
    fn default() -> Self {
        Self {
            lists: vec![Playlist {
                name: DEFAULT_PLAYLIST.to_string(),
                entries: Vec::new(),
            }],
        }
    }
}

impl Playlists {
    /// Names in creation order.
    pub fn names(&self) -> Vec<&str> {
        self.lists.iter().map(|list| list.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Playlist> {
        self.lists.iter().find(|list| list.name == name)
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut Playlist, GrabError> {
        self.lists
            .iter_mut()
            .find(|list| list.name == name)
            .ok_or_else(|| GrabError::NotFound(format!("playlist {name:?}")))
    }

    pub fn create(&mut self, name: &str) -> Result<&Playlist, GrabError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(GrabError::InvalidInput("playlist name is empty".into()));
        }
        if self.get(name).is_some() {
            return Err(GrabError::InvalidInput(format!(
                "playlist {name:?} already exists"
            )));
        }
        self.lists.push(Playlist {
            name: name.to_string(),
            entries: Vec::new(),
        });
        Ok(&self.lists[self.lists.len() - 1])
    }

    pub fn add(&mut self, name: &str, record: ArtifactRecord) -> Result<usize, GrabError> {
        let list = self.get_mut(name)?;
        list.entries.push(record);
        Ok(list.entries.len())
    }

    pub fn remove(&mut self, name: &str, index: usize) -> Result<ArtifactRecord, GrabError> {
        let list = self.get_mut(name)?;
        if index >= list.entries.len() {
            return Err(GrabError::NotFound(format!("entry {index} of {name:?}")));
        }
        Ok(list.entries.remove(index))
    }
}

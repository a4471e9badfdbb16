//! Working directory state.
//!
//! Holds the "current directory" that `ls`, `cd`, `touch` and `mkdir`
//! operate against. Names given by clients are resolved lexically, one
//! component at a time, so a confined directory never climbs above its root.

use std::path::{Component, Path, PathBuf};

/// A navigable current directory anchored at a root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingDir {
    root: PathBuf,
    current: PathBuf,
    confine: bool,
}

impl WorkingDir {
    /// Start at `root`, which must be an existing directory.
    pub fn new(root: PathBuf, confine: bool) -> Self {
        Self {
            current: root.clone(),
            root,
            confine,
        }
    }

    /// The current directory.
    pub fn current(&self) -> &Path {
        &self.current
    }

    /// Resolve a client-supplied name against the current directory.
    ///
    /// Root and prefix components are dropped, so `/etc` means `<current>/etc`.
    /// `..` never goes above the root when confined, nor above `/` otherwise.
    pub fn resolve(&self, name: &str) -> PathBuf {
        let mut path = self.current.clone();
        for component in Path::new(name).components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::ParentDir => {
                    if !(self.confine && path == self.root) {
                        path.pop();
                    }
                }
                Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            }
        }
        path
    }

    /// Move to `name` if it resolves to an existing directory.
    ///
    /// Returns the (possibly unchanged) current directory.
    pub fn change(&mut self, name: &str) -> &Path {
        let target = self.resolve(name);
        if target.is_dir() {
            self.current = target;
        }
        &self.current
    }
}

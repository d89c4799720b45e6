//! Named threads, the detached thread, and which one is current.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, info};

use crate::error::ThreadError;
use crate::message::{Message, Role};
use crate::policy::{Confirm, Confirmation, Policy};
use crate::range::RangeSpec;
use crate::thread::Thread;

/// Identity of a thread within a [`Session`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum ThreadKey {
    #[default]
    Detached,
    Named(String),
}

impl ThreadKey {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Detached => None,
            Self::Named(name) => Some(name),
        }
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Detached => f.write_str("detached thread"),
            Self::Named(name) => write!(f, "{name:?}"),
        }
    }
}

/// What [`Session::switch`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Switched {
    Detached,
    Existing(String),
    Created(String),
}

/// How copied messages land in the destination thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMode {
    /// Append after whatever the destination holds.
    Append,
    /// Clear the destination's non-sticky messages first.
    Overwrite,
}

/// Thread counts for display, largest named thread first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadListing {
    pub named: Vec<(String, usize)>,
    pub detached: usize,
}

/// Snapshot handed to the gateway while the target thread is marked busy.
#[derive(Debug)]
#[must_use = "a pending generation keeps its thread busy until completed or abandoned"]
pub struct PendingGeneration {
    target: ThreadKey,
    prompt: Vec<Message>,
}

impl PendingGeneration {
    #[must_use]
    pub fn target(&self) -> &ThreadKey {
        &self.target
    }

    #[must_use]
    pub fn prompt(&self) -> &[Message] {
        &self.prompt
    }
}

/// Owns every thread of an interactive session.
#[derive(Debug, Default)]
pub struct Session {
    threads: BTreeMap<String, Thread>,
    detached: Thread,
    current: ThreadKey,
    busy: Option<ThreadKey>,
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn current_key(&self) -> &ThreadKey {
        &self.current
    }

    #[must_use]
    pub fn current(&self) -> &Thread {
        match &self.current {
            ThreadKey::Detached => &self.detached,
            ThreadKey::Named(name) => self.threads.get(name).unwrap_or(&self.detached),
        }
    }

    /// Mutable access to the current thread, refused while it awaits a reply.
    pub fn current_mut(&mut self) -> Result<&mut Thread, ThreadError> {
        let key = self.current.clone();
        self.thread_mut(&key)
    }

    #[must_use]
    pub fn thread(&self, key: &ThreadKey) -> Option<&Thread> {
        match key {
            ThreadKey::Detached => Some(&self.detached),
            ThreadKey::Named(name) => self.threads.get(name),
        }
    }

    pub fn thread_mut(&mut self, key: &ThreadKey) -> Result<&mut Thread, ThreadError> {
        self.ensure_idle(key)?;
        match key {
            ThreadKey::Detached => Ok(&mut self.detached),
            ThreadKey::Named(name) => self
                .threads
                .get_mut(name)
                .ok_or_else(|| ThreadError::no_such_thread(name)),
        }
    }

    #[must_use]
    pub fn detached(&self) -> &Thread {
        &self.detached
    }

    #[must_use]
    pub fn named(&self) -> &BTreeMap<String, Thread> {
        &self.threads
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.threads.contains_key(name)
    }

    #[must_use]
    pub fn is_busy(&self, key: &ThreadKey) -> bool {
        self.busy.as_ref() == Some(key)
    }

    fn ensure_idle(&self, key: &ThreadKey) -> Result<(), ThreadError> {
        if self.is_busy(key) {
            return Err(ThreadError::ThreadBusy {
                thread: key.to_string(),
            });
        }
        Ok(())
    }

    /// With no name, switches to the detached thread. An unknown name creates
    /// a thread holding a deep copy of the current one.
    pub fn switch(&mut self, name: Option<&str>) -> Switched {
        let Some(name) = name else {
            self.current = ThreadKey::Detached;
            debug!("switched to detached thread");
            return Switched::Detached;
        };

        let switched = if self.threads.contains_key(name) {
            Switched::Existing(name.to_string())
        } else {
            let mut created = self.current().clone();
            if created.is_empty() {
                created.mark_clean();
            } else {
                created.mark_dirty();
            }
            if self.current == ThreadKey::Detached {
                // Its messages now live on in the named thread.
                self.detached.mark_clean();
            }
            self.threads.insert(name.to_string(), created);
            info!(thread = name, from = %self.current, "created thread");
            Switched::Created(name.to_string())
        };

        self.current = ThreadKey::named(name);
        debug!(thread = name, "switched thread");
        switched
    }

    #[must_use]
    pub fn list(&self) -> ThreadListing {
        let mut named: Vec<(String, usize)> = self
            .threads
            .iter()
            .map(|(name, thread)| (name.clone(), thread.len()))
            .collect();
        named.sort_by(|(a_name, a_len), (b_name, b_len)| {
            b_len.cmp(a_len).then_with(|| a_name.cmp(b_name))
        });

        ThreadListing {
            named,
            detached: self.detached.len(),
        }
    }

    /// Deletes one named thread. Deleting the current thread switches to the
    /// detached one.
    pub fn delete(&mut self, name: &str) -> Result<Thread, ThreadError> {
        let key = ThreadKey::named(name);
        self.ensure_idle(&key)?;
        let removed = self
            .threads
            .remove(name)
            .ok_or_else(|| ThreadError::no_such_thread(name))?;

        if self.current == key {
            self.current = ThreadKey::Detached;
        }
        info!(thread = name, "deleted thread");
        Ok(removed)
    }

    /// Deletes every named thread and returns how many there were.
    pub fn delete_all(&mut self) -> Result<usize, ThreadError> {
        if let Some(busy @ ThreadKey::Named(_)) = &self.busy {
            return Err(ThreadError::ThreadBusy {
                thread: busy.to_string(),
            });
        }

        let count = self.threads.len();
        self.threads.clear();
        self.current = ThreadKey::Detached;
        info!(count, "deleted all named threads");
        Ok(count)
    }

    /// Merges loaded threads in. A loaded thread replaces any thread of the
    /// same name entirely; the current key keeps pointing at that name.
    pub fn load(
        &mut self,
        threads: impl IntoIterator<Item = (String, Thread)>,
    ) -> Result<usize, ThreadError> {
        let threads: Vec<(String, Thread)> = threads.into_iter().collect();
        if let Some(ThreadKey::Named(busy)) = &self.busy {
            if threads.iter().any(|(name, _)| name == busy) {
                return Err(ThreadError::ThreadBusy {
                    thread: ThreadKey::named(busy.clone()).to_string(),
                });
            }
        }

        let count = threads.len();
        for (name, mut thread) in threads {
            thread.mark_clean();
            self.threads.insert(name, thread);
        }
        debug!(count, "loaded threads");
        Ok(count)
    }

    /// Copies a range of the current thread into `dest`: the detached thread
    /// when `None`, otherwise the named thread, created with the current
    /// thread's default names if absent. Returns how many messages were copied.
    pub fn copy(
        &mut self,
        spec: RangeSpec,
        dest: Option<&str>,
        mode: CopyMode,
    ) -> Result<usize, ThreadError> {
        let copies = self.current().copy_range(spec)?;
        let key = dest.map_or(ThreadKey::Detached, ThreadKey::named);
        self.ensure_idle(&key)?;

        let target = match &key {
            ThreadKey::Detached => &mut self.detached,
            ThreadKey::Named(name) => {
                if !self.threads.contains_key(name) {
                    let names = self.current().default_names().clone();
                    self.threads
                        .insert(name.clone(), Thread::from_parts(Vec::new(), names));
                    info!(thread = name.as_str(), "created thread for copy");
                }
                self.threads
                    .get_mut(name)
                    .ok_or_else(|| ThreadError::no_such_thread(name))?
            }
        };

        if mode == CopyMode::Overwrite {
            target.clear();
        }
        Ok(target.extend_verbatim(copies))
    }

    /// Appends a new message to the current thread. Empty content is admitted
    /// only when `empty_policy` allows it.
    pub fn append(
        &mut self,
        role: Role,
        content: impl Into<String>,
        empty_policy: Policy,
        confirm: &mut dyn Confirm,
    ) -> Result<usize, ThreadError> {
        let content = content.into();
        self.current_mut()?;
        if content.is_empty()
            && !empty_policy.decide(confirm, &Confirmation::EmptyMessage { role })
        {
            return Err(ThreadError::EmptyContent { role });
        }
        self.current_mut()
            .map(|thread| thread.append(Message::new(role, content)))
    }

    /// True when any thread holds changes not yet saved.
    #[must_use]
    pub fn has_unsaved_changes(&self) -> bool {
        self.detached.is_dirty() || self.threads.values().any(Thread::is_dirty)
    }

    /// Clears the dirty flag on every named thread.
    pub fn mark_saved(&mut self) {
        for thread in self.threads.values_mut() {
            thread.mark_clean();
        }
    }

    /// Marks the current thread busy and snapshots it as a prompt.
    pub fn begin_generation(&mut self) -> Result<PendingGeneration, ThreadError> {
        if let Some(busy) = &self.busy {
            return Err(ThreadError::ThreadBusy {
                thread: busy.to_string(),
            });
        }

        let target = self.current.clone();
        let prompt = self.current().messages().to_vec();
        self.busy = Some(target.clone());
        debug!(thread = %target, messages = prompt.len(), "generation started");
        Ok(PendingGeneration { target, prompt })
    }

    /// Releases the busy mark and appends the reply as an assistant message.
    /// Returns the reply's position.
    pub fn complete_generation(
        &mut self,
        pending: PendingGeneration,
        content: impl Into<String>,
    ) -> Result<usize, ThreadError> {
        self.busy = None;
        let thread = self.thread_mut(&pending.target)?;
        let position = thread.append(Message::assistant(content));
        debug!(thread = %pending.target, position, "generation committed");
        Ok(position)
    }

    /// Releases the busy mark without touching the thread.
    pub fn abandon_generation(&mut self, pending: PendingGeneration) {
        self.busy = None;
        debug!(thread = %pending.target, "generation abandoned");
    }
}

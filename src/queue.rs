// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Internally synchronized FIFO queue

use std::collections::VecDeque;
use std::sync::Mutex;

/// A thread-safe FIFO of opaque work items.
///
/// All operations take the internal lock for their whole duration and never
/// block on anything else while holding it, so any interleaving of `push`,
/// `pop`, `is_empty` and `len` from multiple threads is serializable.
///
/// Popping from an empty queue is a caller bug and panics; callers gate their
/// pops on an external items-available signal.
#[derive(Debug)]
pub struct SyncQueue<T> {
    inner: Mutex<VecDeque<T>>,
}

impl<T> SyncQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends `value` at the tail.
    pub fn push(&self, value: T) {
        self.lock().push_back(value);
    }

    /// Removes and returns the head entry.
    ///
    /// # Panics
    ///
    /// Panics if the queue is empty.
    pub fn pop(&self) -> T {
        self.lock().pop_front().expect("queue was empty on pop")
    }

    /// Returns whether the queue currently holds no entries.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Returns the current number of entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<T>> {
        // A poisoned lock means a panic while pushing or popping, which the
        // queue itself never does; keep the data and continue.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<T> Default for SyncQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

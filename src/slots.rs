// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Command slot store.
//!
//! [`CommandSlots`] holds the select/insert/update/delete templates of one
//! adapter. Observers are told about every change and may read and write
//! slots from inside that notification, including the "read, clear, restore"
//! dance used to force dependents to rebind.
//!
//! Rules that keep this bounded:
//! - setting a slot to the template it already holds is a no-op;
//! - the slot contents and the template's attachment change together under
//!   one lock, so the pair is never observed half-updated;
//! - while observers run for a role, further changes to that same role are
//!   applied but not re-broadcast.
//!
//! ```
//! use std::sync::Arc;
//! use sync_adapter::{CommandSlots, CommandTemplate, StatementKind};
//!
//! let slots = CommandSlots::new();
//! let insert = Arc::new(CommandTemplate::new(StatementKind::Insert, "users", "insert users"));
//!
//! slots.set(StatementKind::Insert, Some(insert.clone()));
//! assert!(Arc::ptr_eq(&slots.get(StatementKind::Insert).unwrap(), &insert));
//! assert_eq!(insert.attachment_count(), 1);
//!
//! slots.clear(StatementKind::Insert);
//! assert_eq!(insert.attachment_count(), 0);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::command::{CommandTemplate, StatementKind};

pub type TemplateRef = Arc<CommandTemplate>;

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// Attachment of a template to one role of one slot store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SlotBinding {
    store: u64,
    role: StatementKind,
}

impl SlotBinding {
    pub(crate) fn new(store: u64, role: StatementKind) -> Self {
        Self { store, role }
    }
}

/// A committed slot change, as delivered to observers.
#[derive(Debug, Clone)]
pub struct SlotChange {
    pub role: StatementKind,
    pub previous: Option<TemplateRef>,
    pub current: Option<TemplateRef>,
}

/// Notified after a slot changes. May call back into the store.
pub trait SlotObserver: Send + Sync {
    fn slot_changed(&self, slots: &CommandSlots, change: &SlotChange);
}

#[derive(Default)]
struct SlotsInner {
    templates: [Option<TemplateRef>; 4],
    notifying: [bool; 4],
}

pub struct CommandSlots {
    id: u64,
    inner: Mutex<SlotsInner>,
    observers: Mutex<Vec<Arc<dyn SlotObserver>>>,
}

/// Clears the role's notifying flag even if an observer panics.
struct NotifyGuard<'a> {
    slots: &'a CommandSlots,
    role: StatementKind,
}

impl Drop for NotifyGuard<'_> {
    fn drop(&mut self) {
        self.slots.inner.lock().notifying[self.role.index()] = false;
    }
}

fn same(a: Option<&TemplateRef>, b: Option<&TemplateRef>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

impl CommandSlots {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
            inner: Mutex::new(SlotsInner::default()),
            observers: Mutex::new(Vec::new()),
        }
    }

    fn binding(&self, role: StatementKind) -> SlotBinding {
        SlotBinding::new(self.id, role)
    }

    #[must_use]
    pub fn get(&self, role: StatementKind) -> Option<TemplateRef> {
        self.inner.lock().templates[role.index()].clone()
    }

    /// Replace the template in `role`. Safe to call from an observer.
    pub fn set(&self, role: StatementKind, template: Option<TemplateRef>) {
        let binding = self.binding(role);
        let change = {
            let mut inner = self.inner.lock();
            let slot = &mut inner.templates[role.index()];
            if same(slot.as_ref(), template.as_ref()) {
                return;
            }

            let previous = std::mem::replace(slot, template.clone());
            if let Some(old) = &previous {
                old.detach(binding);
            }
            if let Some(new) = &template {
                new.attach(binding);
            }

            if inner.notifying[role.index()] {
                debug!(store = self.id, %role, "Nested slot change applied without re-notify");
                return;
            }
            inner.notifying[role.index()] = true;

            SlotChange {
                role,
                previous,
                current: template,
            }
        };

        let _guard = NotifyGuard { slots: self, role };
        debug!(
            store = self.id,
            %role,
            cleared = change.current.is_none(),
            "Command slot changed"
        );
        let observers: Vec<Arc<dyn SlotObserver>> = self.observers.lock().clone();
        for observer in &observers {
            observer.slot_changed(self, &change);
        }
    }

    pub fn clear(&self, role: StatementKind) {
        self.set(role, None);
    }

    /// Register an observer for slot changes.
    pub fn subscribe(&self, observer: Arc<dyn SlotObserver>) {
        self.observers.lock().push(observer);
    }

    /// Every held template is attached exactly once to its (store, role).
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let inner = self.inner.lock();
        StatementKind::ALL.iter().all(|role| {
            inner.templates[role.index()]
                .as_ref()
                .map_or(true, |t| t.is_attached_to(self.binding(*role)))
        })
    }
}

impl Default for CommandSlots {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CommandSlots {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        for role in StatementKind::ALL {
            if let Some(template) = inner.templates[role.index()].take() {
                template.detach(SlotBinding::new(self.id, role));
            }
        }
    }
}

impl std::fmt::Debug for CommandSlots {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        let filled: Vec<StatementKind> = StatementKind::ALL
            .into_iter()
            .filter(|r| inner.templates[r.index()].is_some())
            .collect();
        f.debug_struct("CommandSlots")
            .field("id", &self.id)
            .field("filled", &filled)
            .finish()
    }
}

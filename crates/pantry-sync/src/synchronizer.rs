use std::sync::Arc;

use pantry_cache::{Collection, QueryKey, ReadCache};
use pantry_core::{EventEnvelope, EventType, HouseholdId, ListId, UserId};
use tracing::{debug, trace};

use crate::registry::{Handler, SubscriptionRegistry};

/// Where newly added records go.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    Append,
    /// Newest first, as in a notification feed.
    Prepend,
}

/// The collection a synchronizer keeps in step and the events that feed it.
#[derive(Clone, Debug, PartialEq)]
pub struct SyncTarget {
    pub key: QueryKey,
    pub scope_id: String,
    pub added: Option<EventType>,
    pub updated: Option<EventType>,
    pub deleted: Option<EventType>,
    pub placement: Placement,
}

impl SyncTarget {
    /// Household inventory: `item.*` scoped to the household.
    pub fn inventory(household_id: impl Into<HouseholdId>) -> Self {
        let household_id = household_id.into();
        Self {
            scope_id: household_id.to_string(),
            key: QueryKey::inventory(household_id),
            added: Some(EventType::ItemAdded),
            updated: Some(EventType::ItemUpdated),
            deleted: Some(EventType::ItemDeleted),
            placement: Placement::Append,
        }
    }

    /// Items of one shopping list: `shoppinglist.item.*` scoped to the list.
    pub fn shopping_list(household_id: impl Into<HouseholdId>, list_id: impl Into<ListId>) -> Self {
        let list_id = list_id.into();
        Self {
            scope_id: list_id.to_string(),
            key: QueryKey::shopping_list(household_id, list_id),
            added: Some(EventType::ShoppingListItemAdded),
            updated: Some(EventType::ShoppingListItemUpdated),
            deleted: Some(EventType::ShoppingListItemDeleted),
            placement: Placement::Append,
        }
    }

    /// A user's notification feed: `notification.new` only, newest first.
    pub fn notifications(user_id: impl Into<UserId>) -> Self {
        let user_id = user_id.into();
        Self {
            scope_id: user_id.to_string(),
            key: QueryKey::notifications(user_id),
            added: Some(EventType::NotificationNew),
            updated: None,
            deleted: None,
            placement: Placement::Prepend,
        }
    }

    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    pub fn event_types(&self) -> Vec<EventType> {
        [self.added, self.updated, self.deleted]
            .into_iter()
            .flatten()
            .collect()
    }

    fn operation(&self, kind: EventType) -> Option<Operation> {
        if self.added == Some(kind) {
            Some(Operation::Add)
        } else if self.updated == Some(kind) {
            Some(Operation::Update)
        } else if self.deleted == Some(kind) {
            Some(Operation::Delete)
        } else {
            None
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Operation {
    Add,
    Update,
    Delete,
}

/// What applying one envelope did to the collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    Inserted,
    Merged,
    Removed,
    Skipped(SkipReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    UnhandledType,
    ScopeMismatch,
    MalformedPayload,
    /// The collection was never fetched; there is nothing to patch.
    NotHydrated,
    DuplicateId,
    UnknownId,
}

/// Translates envelopes into point mutations of one cached collection.
///
/// Inactive until [`activate`](Self::activate) registers it with a registry.
pub struct CacheSynchronizer {
    target: SyncTarget,
    cache: Arc<dyn ReadCache>,
}

impl CacheSynchronizer {
    pub fn new(target: SyncTarget, cache: Arc<dyn ReadCache>) -> Self {
        Self { target, cache }
    }

    pub fn target(&self) -> &SyncTarget {
        &self.target
    }

    /// Apply one envelope. Unknown scopes, keys and ids are silent no-ops.
    pub fn apply(&self, envelope: &EventEnvelope) -> SyncOutcome {
        let Some(op) = envelope.kind().and_then(|k| self.target.operation(k)) else {
            return SyncOutcome::Skipped(SkipReason::UnhandledType);
        };
        if envelope.scope_id != self.target.scope_id {
            trace!(
                key = %self.target.key,
                event_type = %envelope.event_type,
                scope_id = %envelope.scope_id,
                "event for another scope"
            );
            return SyncOutcome::Skipped(SkipReason::ScopeMismatch);
        }
        let payload = match envelope.item_payload() {
            Ok(payload) => payload,
            Err(error) => {
                debug!(
                    key = %self.target.key,
                    event_type = %envelope.event_type,
                    error = %error,
                    "skipping malformed payload"
                );
                return SyncOutcome::Skipped(SkipReason::MalformedPayload);
            }
        };

        let id = payload.item_id.as_str();
        let mut outcome = SyncOutcome::Skipped(SkipReason::NotHydrated);
        let mut updater = |mut collection: Collection| {
            outcome = match op {
                Operation::Add => {
                    let record = payload.to_record();
                    let inserted = match self.target.placement {
                        Placement::Append => collection.insert_if_absent(id, record),
                        Placement::Prepend => collection.prepend_if_absent(id, record),
                    };
                    if inserted {
                        SyncOutcome::Inserted
                    } else {
                        SyncOutcome::Skipped(SkipReason::DuplicateId)
                    }
                }
                Operation::Update => match &payload.item {
                    Some(patch) if collection.merge(id, patch) => SyncOutcome::Merged,
                    Some(_) => SyncOutcome::Skipped(SkipReason::UnknownId),
                    None => SyncOutcome::Skipped(SkipReason::MalformedPayload),
                },
                Operation::Delete => {
                    if collection.remove(id) {
                        SyncOutcome::Removed
                    } else {
                        SyncOutcome::Skipped(SkipReason::UnknownId)
                    }
                }
            };
            collection
        };
        let _ = self.cache.set(&self.target.key, &mut updater);

        trace!(
            key = %self.target.key,
            event_type = %envelope.event_type,
            item_id = id,
            outcome = ?outcome,
            "event applied"
        );
        outcome
    }

    /// Register for every event type of the target. The returned guard
    /// deregisters on drop.
    pub fn activate(self, registry: &Arc<SubscriptionRegistry>) -> ActiveSync {
        let key = self.target.key.clone();
        let event_types = self.target.event_types();
        let sync = Arc::new(self);
        let handler = Handler::new(format!("sync:{key}"), move |envelope| {
            let _ = sync.apply(envelope);
            Ok(())
        });
        for event_type in &event_types {
            let _ = registry.on(event_type.as_str(), &handler);
        }
        debug!(key = %key, types = event_types.len(), "synchronizer active");
        ActiveSync {
            key,
            event_types,
            handler,
            registry: Arc::clone(registry),
        }
    }
}

/// An active synchronizer. Dropping it removes every subscription it made.
pub struct ActiveSync {
    key: QueryKey,
    event_types: Vec<EventType>,
    handler: Handler,
    registry: Arc<SubscriptionRegistry>,
}

impl ActiveSync {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn deactivate(self) {
        drop(self);
    }
}

impl Drop for ActiveSync {
    fn drop(&mut self) {
        for event_type in &self.event_types {
            let _ = self.registry.off(event_type.as_str(), &self.handler);
        }
        debug!(key = %self.key, "synchronizer inactive");
    }
}

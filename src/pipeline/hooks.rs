//! Hook registries keyed by declared type.

use indexmap::IndexMap;
use tracing::trace;

use crate::storage::{Change, Entity, EntityType};
use crate::transaction::{DatabaseContext, TransactError, TransactResult};

/// Ordered mapping from declared type to one hook.
///
/// Filled while configuring a stage and read-only afterwards.
#[derive(Clone)]
pub struct HookRegistry<H> {
    hooks: IndexMap<EntityType, H>,
}

impl<H> HookRegistry<H> {
    pub fn new() -> Self {
        Self {
            hooks: IndexMap::new(),
        }
    }

    /// Register `hook` for objects declared as `T`.
    ///
    /// Fails with [`TransactError::DuplicateHook`] if `T` already has one.
    pub fn register<T: Entity>(&mut self, hook: H) -> TransactResult<()> {
        self.register_type(EntityType::of::<T>(), hook)
    }

    pub fn register_type(&mut self, entity_type: EntityType, hook: H) -> TransactResult<()> {
        if self.hooks.contains_key(&entity_type) {
            return Err(TransactError::DuplicateHook {
                type_name: entity_type.name(),
            });
        }
        self.hooks.insert(entity_type, hook);
        Ok(())
    }

    pub fn get(&self, entity_type: &EntityType) -> Option<&H> {
        self.hooks.get(entity_type)
    }

    pub fn contains<T: Entity>(&self) -> bool {
        self.hooks.contains_key(&EntityType::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Registered types, in registration order.
    pub fn types(&self) -> impl Iterator<Item = &EntityType> {
        self.hooks.keys()
    }
}

impl<H> Default for HookRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> std::fmt::Debug for HookRegistry<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.hooks.keys().map(|t| t.short_name()))
            .finish()
    }
}

/// Pair every inserted or updated object with the hook registered for its
/// declared type.
///
/// Follows the transaction's change order. Deletes are skipped, as are
/// objects that no longer resolve. The result is collected because reading
/// the changes needs the open transaction.
pub fn select_hooks<H: Clone>(
    db: &dyn DatabaseContext,
    registry: &HookRegistry<H>,
) -> TransactResult<Vec<(Change, H)>> {
    if registry.is_empty() {
        return Ok(Vec::new());
    }

    let mut selected = Vec::new();
    for change in db.changes()? {
        if change.is_delete() {
            continue;
        }

        let Some(entity_type) = db.declared_type(change.oid)? else {
            continue;
        };

        if let Some(hook) = registry.get(&entity_type) {
            selected.push((change, hook.clone()));
        }
    }

    trace!(tx_id = %db.transaction_id(), selected = selected.len(), "selected hooks");
    Ok(selected)
}

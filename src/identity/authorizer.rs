//! Which entities may a principal act as, and token issuance for those entities.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::entity::{Entity, EntityTree, split_identifier};
use super::principal::Principal;
use crate::cache::{EvictionOrder, SharedCache};
use crate::error::{AuthError, AuthResult};
use crate::store::{EntityRecord, EntityUpdate, SharedStore};
use crate::token::codec::TokenCodec;
use crate::token::payload::TokenPayload;
use crate::token::validator::{Clock, SystemClock};

/// Extra token fields chosen by the caller at issuance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenOptions {
    /// Hostname of the resource server the token is bound to.
    pub origin: Option<String>,
    pub session_key: Option<Vec<u8>>,
}

pub trait Authorizer: Send + Sync {
    /// Entities granted to `principal` whose direct parent is `parent` (the root
    /// when absent), in grant order.
    fn entities_of(&self, principal: &Principal, parent: Option<&Entity>) -> AuthResult<Vec<Entity>>;

    fn resolve(&self, identifier_path: &str) -> AuthResult<Entity>;

    /// `Ok(None)` means this authorizer declines: no shared secret, or the entity
    /// is not granted to the principal here.
    fn issue_token(&self, principal: &Principal, entity: &Entity, options: &TokenOptions) -> AuthResult<Option<String>>;
}

#[derive(Clone)]
struct Issuer {
    codec: Option<TokenCodec>,
    clock: Arc<dyn Clock>,
}

impl Default for Issuer {
    fn default() -> Self { Self { codec: None, clock: Arc::new(SystemClock) } }
}

impl Issuer {
    fn issue(&self, principal: &Principal, entity: &Entity, options: &TokenOptions) -> AuthResult<Option<String>> {
        let Some(codec) = self.codec.as_ref() else {
            debug!(target: "auth", "no shared secret configured; declining token issuance");
            return Ok(None);
        };
        let payload = TokenPayload {
            principal: principal.name().to_string(),
            entity: entity.identifier_path().to_string(),
            issued_at: self.clock.now_secs(),
            origin: options.origin.clone(),
            session_key: options.session_key.clone(),
        };
        let token = codec.issue(&payload)?;
        info!(target: "auth", principal = %principal, entity = %entity, origin = ?options.origin, "issued token");
        Ok(Some(token))
    }
}

/// In-memory per-principal forests over a shared interning tree.
pub struct EntityAuthorizer {
    tree: EntityTree,
    grants: RwLock<HashMap<Principal, Vec<Entity>>>,
    issuer: Issuer,
}

impl Default for EntityAuthorizer {
    fn default() -> Self { Self::new() }
}

impl fmt::Debug for EntityAuthorizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityAuthorizer")
            .field("nodes", &self.tree.len())
            .field("principals", &self.grants.read().len())
            .field("issues_tokens", &self.issuer.codec.is_some())
            .finish()
    }
}

impl EntityAuthorizer {
    pub fn new() -> Self { Self { tree: EntityTree::new(), grants: RwLock::new(HashMap::new()), issuer: Issuer::default() } }

    pub fn with_codec(mut self, codec: TokenCodec) -> Self {
        self.issuer.codec = Some(codec);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.issuer.clock = clock;
        self
    }

    pub fn tree(&self) -> &EntityTree { &self.tree }

    pub fn create(&self, label: &str, parent: Option<&Entity>) -> AuthResult<Entity> { self.tree.create(label, parent) }

    pub fn create_path(&self, path: &str) -> AuthResult<Entity> { self.tree.create_path(path) }

    pub fn resolve_existing(&self, path: &str) -> AuthResult<Entity> { self.tree.resolve_existing(path) }

    /// Append `entity` to the principal's list. No duplicate check.
    pub fn grant(&self, principal: &Principal, entity: Entity) {
        self.grants.write().entry(principal.clone()).or_default().push(entity);
    }

    /// Grant every node on `path`, skipping nodes the principal already holds.
    /// Returns the last node.
    pub fn grant_path(&self, principal: &Principal, path: &str) -> AuthResult<Entity> {
        let leaf = self.tree.create_path(path)?;
        let mut chain = Vec::new();
        let mut cursor = Some(leaf.clone());
        while let Some(node) = cursor {
            if node.is_root() {
                break;
            }
            cursor = node.parent().cloned();
            chain.push(node);
        }
        let mut grants = self.grants.write();
        let list = grants.entry(principal.clone()).or_default();
        for node in chain.into_iter().rev() {
            if !list.iter().any(|e| e.same_path(&node)) {
                list.push(node);
            }
        }
        Ok(leaf)
    }

    /// Drop `path` and everything below it from the principal's list.
    pub fn revoke_path(&self, principal: &Principal, path: &str) -> usize {
        let mut grants = self.grants.write();
        let Some(list) = grants.get_mut(principal) else { return 0 };
        let before = list.len();
        let prefix = format!("{path}:");
        list.retain(|e| e.identifier_path() != path && !e.identifier_path().starts_with(&prefix));
        before - list.len()
    }

    pub fn granted(&self, principal: &Principal) -> Vec<Entity> {
        self.grants.read().get(principal).cloned().unwrap_or_default()
    }

    pub fn is_granted(&self, principal: &Principal, entity: &Entity) -> bool {
        self.grants.read().get(principal).is_some_and(|list| list.iter().any(|e| e.same_path(entity)))
    }
}

impl Authorizer for EntityAuthorizer {
    fn entities_of(&self, principal: &Principal, parent: Option<&Entity>) -> AuthResult<Vec<Entity>> {
        let grants = self.grants.read();
        Ok(grants
            .get(principal)
            .map(|list| list.iter().filter(|e| e.has_parent(parent)).cloned().collect())
            .unwrap_or_default())
    }

    fn resolve(&self, identifier_path: &str) -> AuthResult<Entity> { self.tree.create_path(identifier_path) }

    fn issue_token(&self, principal: &Principal, entity: &Entity, options: &TokenOptions) -> AuthResult<Option<String>> {
        if !self.is_granted(principal, entity) {
            return Ok(None);
        }
        self.issuer.issue(principal, entity, options)
    }
}

/// Entity grants held in the store. Each principal's granted list is cached and
/// dropped from the cache whenever it is changed through this authorizer.
///
/// Listing also surfaces the ancestors of every granted entity so clients can
/// navigate down to them; tokens are only issued for entities actually granted.
pub struct StoreAuthorizer {
    store: SharedStore,
    tree: EntityTree,
    cache: SharedCache<String, Vec<Entity>>,
    issuer: Issuer,
}

impl fmt::Debug for StoreAuthorizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreAuthorizer")
            .field("cached_principals", &self.cache.len())
            .field("issues_tokens", &self.issuer.codec.is_some())
            .finish_non_exhaustive()
    }
}

impl StoreAuthorizer {
    pub fn new(store: SharedStore, cache_capacity: usize) -> AuthResult<Self> {
        Self::with_eviction(store, cache_capacity, EvictionOrder::Insertion)
    }

    pub fn with_eviction(store: SharedStore, cache_capacity: usize, order: EvictionOrder) -> AuthResult<Self> {
        Ok(Self {
            store,
            tree: EntityTree::new(),
            cache: SharedCache::new(cache_capacity, order)?,
            issuer: Issuer::default(),
        })
    }

    pub fn with_codec(mut self, codec: TokenCodec) -> Self {
        self.issuer.codec = Some(codec);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.issuer.clock = clock;
        self
    }

    pub fn invalidate(&self, principal: &Principal) {
        if self.cache.remove(principal.name()).is_some() {
            debug!(target: "store", principal = %principal, "dropped cached grants");
        }
    }

    /// Persist a grant of `path` to the principal.
    pub fn grant(&self, principal: &Principal, path: &str, flags: i32) -> AuthResult<Entity> {
        split_identifier(path)?;
        let entity = self.tree.create_path(path)?;
        self.store.create_entity(EntityRecord::new(principal.name(), entity.identifier_path(), flags))?;
        self.invalidate(principal);
        Ok(entity)
    }

    /// Change flags, stats or the identifier path of an existing grant.
    pub fn update(&self, principal: &Principal, path: &str, update: EntityUpdate) -> AuthResult<()> {
        if let Some(label) = update.label.as_deref() {
            split_identifier(label)?;
        }
        self.store.update_entity(principal.name(), path, update)?;
        self.invalidate(principal);
        Ok(())
    }

    pub fn is_granted(&self, principal: &Principal, entity: &Entity) -> AuthResult<bool> {
        Ok(self.granted(principal)?.iter().any(|e| e.same_path(entity)))
    }

    pub fn tree(&self) -> &EntityTree { &self.tree }

    pub fn revoke(&self, principal: &Principal, path: &str) -> AuthResult<()> {
        self.store.delete_entity(principal.name(), path)?;
        self.invalidate(principal);
        Ok(())
    }

    /// Entities granted to the principal, as stored. Unknown principals hold none.
    pub fn granted(&self, principal: &Principal) -> AuthResult<Vec<Entity>> {
        if let Some(hit) = self.cache.get(principal.name()) {
            return Ok(hit);
        }
        let records = match self.store.list_entities(principal.name()) {
            Ok(r) => r,
            Err(AuthError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };
        let mut entities = Vec::with_capacity(records.len());
        for record in records {
            match self.tree.create_path(&record.label) {
                Ok(e) => entities.push(e),
                Err(e) => warn!(target: "store", user = %record.user, label = %record.label, error = %e, "skipping unusable entity record"),
            }
        }
        self.cache.put(principal.name().to_string(), entities.clone());
        Ok(entities)
    }
}

impl Authorizer for StoreAuthorizer {
    fn entities_of(&self, principal: &Principal, parent: Option<&Entity>) -> AuthResult<Vec<Entity>> {
        let mut visible: Vec<Entity> = Vec::new();
        for granted in self.granted(principal)? {
            let mut chain = Vec::new();
            let mut cursor = Some(granted);
            while let Some(node) = cursor {
                if node.is_root() {
                    break;
                }
                cursor = node.parent().cloned();
                chain.push(node);
            }
            for node in chain.into_iter().rev() {
                if !visible.iter().any(|v| v.same_path(&node)) {
                    visible.push(node);
                }
            }
        }
        visible.retain(|e| e.has_parent(parent));
        Ok(visible)
    }

    /// Only stored grants are interned; any other valid path gets a transient handle.
    fn resolve(&self, identifier_path: &str) -> AuthResult<Entity> { self.tree.resolve_transient(identifier_path) }

    fn issue_token(&self, principal: &Principal, entity: &Entity, options: &TokenOptions) -> AuthResult<Option<String>> {
        if !self.is_granted(principal, entity)? {
            return Ok(None);
        }
        self.issuer.issue(principal, entity, options)
    }
}

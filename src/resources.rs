//! Resource-level API over the gateway.
//!
//! [`ResourceApi`] is the capability callers program against.
//! [`GatewayClient`] implements it on top of a [`RequestOrchestrator`], deriving
//! cache keys, TTLs and invalidations per resource family.
//! [`InMemoryResources`] is a self-contained fake with the same contract.

use crate::cache::{CacheConfig, ResourceKind};
use crate::config::GatewayConfig;
use crate::context::CallContext;
use crate::errors::CategorizedError;
use crate::orchestrator::RequestOrchestrator;
use crate::transport::{ApiRequest, Invalidation, Method, Transport, cache_key};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceFamily {
    Users,
    Teams,
    Workspaces,
    Collections,
    Items,
    Files,
}

impl ResourceFamily {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Teams => "teams",
            Self::Workspaces => "workspaces",
            Self::Collections => "collections",
            Self::Items => "items",
            Self::Files => "files",
        }
    }

    /// Collection path on the upstream API, e.g. `/items`.
    pub const fn path(self) -> &'static str {
        match self {
            Self::Users => "/users",
            Self::Teams => "/teams",
            Self::Workspaces => "/workspaces",
            Self::Collections => "/collections",
            Self::Items => "/items",
            Self::Files => "/files",
        }
    }

    pub const fn cache_kind(self) -> ResourceKind {
        match self {
            Self::Items => ResourceKind::Item,
            Self::Workspaces => ResourceKind::Workspace,
            Self::Collections => ResourceKind::Collection,
            Self::Users | Self::Teams | Self::Files => ResourceKind::Default,
        }
    }

    pub const fn is_searchable(self) -> bool {
        matches!(self, Self::Items)
    }

    /// Users, teams and files are managed outside this API.
    pub const fn supports_writes(self) -> bool {
        matches!(self, Self::Workspaces | Self::Collections | Self::Items)
    }

    fn ensure_writable(self) -> Result<(), CategorizedError> {
        if self.supports_writes() {
            return Ok(());
        }
        Err(CategorizedError::validation(self.as_str(), "resource family is read-only"))
    }

    fn ensure_searchable(self) -> Result<(), CategorizedError> {
        if self.is_searchable() {
            return Ok(());
        }
        Err(CategorizedError::validation(self.as_str(), "resource family does not support search"))
    }
}

impl fmt::Display for ResourceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListParams {
    /// Restrict to one workspace.
    pub workspace_id: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for ListParams {
    fn default() -> Self {
        Self { workspace_id: None, limit: 50, offset: 0 }
    }
}

impl ListParams {
    fn query(&self) -> String {
        format!("limit={}&offset={}", self.limit, self.offset)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    pub limit: u32,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), workspace_id: None, limit: 20 }
    }
}

/// CRUD plus search for each [`ResourceFamily`].
///
/// Lists and searches answer `{"results": [...]}`.
pub trait ResourceApi: Send + Sync {
    fn get(
        &self,
        ctx: &CallContext,
        family: ResourceFamily,
        id: &str,
    ) -> impl Future<Output = Result<Value, CategorizedError>> + Send;

    fn list(
        &self,
        ctx: &CallContext,
        family: ResourceFamily,
        params: &ListParams,
    ) -> impl Future<Output = Result<Value, CategorizedError>> + Send;

    fn create(
        &self,
        ctx: &CallContext,
        family: ResourceFamily,
        body: Value,
    ) -> impl Future<Output = Result<Value, CategorizedError>> + Send;

    /// Applies the fields of `patch` to an existing resource.
    fn update(
        &self,
        ctx: &CallContext,
        family: ResourceFamily,
        id: &str,
        patch: Value,
    ) -> impl Future<Output = Result<Value, CategorizedError>> + Send;

    fn delete(
        &self,
        ctx: &CallContext,
        family: ResourceFamily,
        id: &str,
    ) -> impl Future<Output = Result<(), CategorizedError>> + Send;

    fn search(
        &self,
        ctx: &CallContext,
        family: ResourceFamily,
        query: &SearchQuery,
    ) -> impl Future<Output = Result<Value, CategorizedError>> + Send;

    /// Moves an item into another collection.
    fn move_item(
        &self,
        ctx: &CallContext,
        item_id: &str,
        collection_id: &str,
    ) -> impl Future<Output = Result<Value, CategorizedError>> + Send;
}

/// [`ResourceApi`] backed by the upstream service.
pub struct GatewayClient<T> {
    orchestrator: RequestOrchestrator<T>,
    cache_config: CacheConfig,
}

impl<T: Transport> GatewayClient<T> {
    pub fn new(transport: T, config: &GatewayConfig) -> Self {
        Self {
            orchestrator: RequestOrchestrator::new(transport, config),
            cache_config: config.cache.clone(),
        }
    }

    /// Wraps an already assembled orchestrator. TTLs come from `cache_config`.
    pub fn with_orchestrator(orchestrator: RequestOrchestrator<T>, cache_config: CacheConfig) -> Self {
        Self { orchestrator, cache_config }
    }

    pub fn orchestrator(&self) -> &RequestOrchestrator<T> {
        &self.orchestrator
    }

    fn item_path(family: ResourceFamily, id: &str) -> String {
        format!("{}/{id}", family.path())
    }

    fn list_path(family: ResourceFamily, params: &ListParams) -> String {
        match &params.workspace_id {
            Some(ws) if family != ResourceFamily::Workspaces => {
                format!("/workspaces/{ws}{}", family.path())
            }
            _ => family.path().to_string(),
        }
    }

    fn search_path(family: ResourceFamily) -> String {
        format!("{}/search", family.path())
    }

    /// Drops every cached list page and search result of `family`.
    fn family_invalidations(family: ResourceFamily) -> Vec<Invalidation> {
        let mut out = vec![Invalidation::Containing(format!("{}:", family.path()))];
        if family.is_searchable() {
            out.push(Invalidation::Prefix(format!("{}:{}", Method::Post, Self::search_path(family))));
        }
        out
    }

    fn mutation(mut request: ApiRequest, family: ResourceFamily, id: Option<&str>) -> ApiRequest {
        if let Some(id) = id {
            let key = cache_key(Method::Get, &Self::item_path(family, id), None);
            request = request.invalidating(Invalidation::Key(key));
        }
        for invalidation in Self::family_invalidations(family) {
            request = request.invalidating(invalidation);
        }
        request
    }
}

impl<T: Transport> ResourceApi for GatewayClient<T> {
    async fn get(&self, ctx: &CallContext, family: ResourceFamily, id: &str) -> Result<Value, CategorizedError> {
        if id.is_empty() {
            return Err(CategorizedError::required_field("id"));
        }
        let path = Self::item_path(family, id);
        let request = ApiRequest::get(path.as_str()).cached(
            cache_key(Method::Get, &path, None),
            self.cache_config.ttl_for(family.cache_kind()),
        );
        self.orchestrator.execute(ctx, &request).await
    }

    async fn list(
        &self,
        ctx: &CallContext,
        family: ResourceFamily,
        params: &ListParams,
    ) -> Result<Value, CategorizedError> {
        let path = Self::list_path(family, params);
        let query = params.query();
        let request = ApiRequest::get(format!("{path}?{query}")).cached(
            cache_key(Method::Get, &path, Some(&query)),
            self.cache_config.ttl_for(family.cache_kind()),
        );
        self.orchestrator.execute(ctx, &request).await
    }

    async fn create(&self, ctx: &CallContext, family: ResourceFamily, body: Value) -> Result<Value, CategorizedError> {
        family.ensure_writable()?;
        let request = Self::mutation(ApiRequest::post(family.path(), body), family, None);
        self.orchestrator.execute(ctx, &request).await
    }

    async fn update(
        &self,
        ctx: &CallContext,
        family: ResourceFamily,
        id: &str,
        patch: Value,
    ) -> Result<Value, CategorizedError> {
        family.ensure_writable()?;
        if id.is_empty() {
            return Err(CategorizedError::required_field("id"));
        }
        let request = Self::mutation(ApiRequest::patch(Self::item_path(family, id), patch), family, Some(id));
        self.orchestrator.execute(ctx, &request).await
    }

    async fn delete(&self, ctx: &CallContext, family: ResourceFamily, id: &str) -> Result<(), CategorizedError> {
        family.ensure_writable()?;
        if id.is_empty() {
            return Err(CategorizedError::required_field("id"));
        }
        let request = Self::mutation(ApiRequest::delete(Self::item_path(family, id)), family, Some(id));
        self.orchestrator.execute(ctx, &request).await.map(|_| ())
    }

    async fn search(
        &self,
        ctx: &CallContext,
        family: ResourceFamily,
        query: &SearchQuery,
    ) -> Result<Value, CategorizedError> {
        family.ensure_searchable()?;
        if query.query.trim().is_empty() {
            return Err(CategorizedError::required_field("query"));
        }
        let path = Self::search_path(family);
        let body = serde_json::to_value(query)
            .map_err(|e| CategorizedError::internal("encode search query").with_source(e))?;
        let params = body.to_string();
        let request = ApiRequest::post(path.as_str(), body).cached(
            cache_key(Method::Post, &path, Some(&params)),
            self.cache_config.ttl_for(ResourceKind::Search),
        );
        self.orchestrator.execute(ctx, &request).await
    }

    async fn move_item(&self, ctx: &CallContext, item_id: &str, collection_id: &str) -> Result<Value, CategorizedError> {
        if item_id.is_empty() {
            return Err(CategorizedError::required_field("item_id"));
        }
        if collection_id.is_empty() {
            return Err(CategorizedError::required_field("collection_id"));
        }
        let family = ResourceFamily::Items;
        let path = format!("{}/move", Self::item_path(family, item_id));
        let request = Self::mutation(
            ApiRequest::patch(path, json!({ "collection_id": collection_id })),
            family,
            Some(item_id),
        );
        self.orchestrator.execute(ctx, &request).await
    }
}

/// In-process [`ResourceApi`] holding resources in memory.
///
/// Resources are JSON objects keyed by a generated `id`. Items found by
/// search are those whose `title` or `content` contains the query,
/// ignoring case.
#[derive(Default)]
pub struct InMemoryResources {
    store: RwLock<BTreeMap<(ResourceFamily, String), Value>>,
}

impl InMemoryResources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a resource as-is, bypassing write restrictions. Used to seed
    /// read-only families.
    pub fn seed(&self, family: ResourceFamily, id: &str, mut body: Value) {
        if let Some(obj) = body.as_object_mut() {
            obj.insert("id".into(), Value::from(id));
        }
        self.store.write().insert((family, id.to_string()), body);
    }

    pub fn len(&self) -> usize {
        self.store.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.read().is_empty()
    }

    fn object(body: Value) -> Result<Map<String, Value>, CategorizedError> {
        match body {
            Value::Object(map) => Ok(map),
            _ => Err(CategorizedError::validation("body", "expected a JSON object")),
        }
    }

    fn in_workspace(value: &Value, workspace_id: Option<&str>) -> bool {
        workspace_id.is_none_or(|ws| value.get("workspace_id").and_then(Value::as_str) == Some(ws))
    }

    fn matches_text(value: &Value, needle: &str) -> bool {
        ["title", "content"].iter().any(|field| {
            value
                .get(field)
                .and_then(Value::as_str)
                .is_some_and(|text| text.to_lowercase().contains(needle))
        })
    }

    fn check_live(ctx: &CallContext) -> Result<(), CategorizedError> {
        match ctx.err() {
            Some(reason) => Err(CategorizedError::timeout("in-memory request", std::time::Duration::ZERO)
                .with_details(reason.to_string())),
            None => Ok(()),
        }
    }
}

impl ResourceApi for InMemoryResources {
    async fn get(&self, ctx: &CallContext, family: ResourceFamily, id: &str) -> Result<Value, CategorizedError> {
        Self::check_live(ctx)?;
        self.store
            .read()
            .get(&(family, id.to_string()))
            .cloned()
            .ok_or_else(|| CategorizedError::not_found(family.as_str(), id))
    }

    async fn list(
        &self,
        ctx: &CallContext,
        family: ResourceFamily,
        params: &ListParams,
    ) -> Result<Value, CategorizedError> {
        Self::check_live(ctx)?;
        let store = self.store.read();
        let results: Vec<Value> = store
            .iter()
            .filter(|((f, _), v)| *f == family && Self::in_workspace(v, params.workspace_id.as_deref()))
            .map(|(_, v)| v.clone())
            .skip(params.offset as usize)
            .take(params.limit as usize)
            .collect();
        Ok(json!({ "results": results }))
    }

    async fn create(&self, ctx: &CallContext, family: ResourceFamily, body: Value) -> Result<Value, CategorizedError> {
        Self::check_live(ctx)?;
        family.ensure_writable()?;
        let mut obj = Self::object(body)?;
        let id = uuid::Uuid::new_v4().to_string();
        obj.insert("id".into(), Value::from(id.clone()));
        let value = Value::Object(obj);
        self.store.write().insert((family, id), value.clone());
        Ok(value)
    }

    async fn update(
        &self,
        ctx: &CallContext,
        family: ResourceFamily,
        id: &str,
        patch: Value,
    ) -> Result<Value, CategorizedError> {
        Self::check_live(ctx)?;
        family.ensure_writable()?;
        let patch = Self::object(patch)?;
        let mut store = self.store.write();
        let existing = store
            .get_mut(&(family, id.to_string()))
            .ok_or_else(|| CategorizedError::not_found(family.as_str(), id))?;
        if let Some(obj) = existing.as_object_mut() {
            for (k, v) in patch {
                if k != "id" {
                    obj.insert(k, v);
                }
            }
        }
        Ok(existing.clone())
    }

    async fn delete(&self, ctx: &CallContext, family: ResourceFamily, id: &str) -> Result<(), CategorizedError> {
        Self::check_live(ctx)?;
        family.ensure_writable()?;
        self.store
            .write()
            .remove(&(family, id.to_string()))
            .map(|_| ())
            .ok_or_else(|| CategorizedError::not_found(family.as_str(), id))
    }

    async fn search(
        &self,
        ctx: &CallContext,
        family: ResourceFamily,
        query: &SearchQuery,
    ) -> Result<Value, CategorizedError> {
        Self::check_live(ctx)?;
        family.ensure_searchable()?;
        let needle = query.query.trim().to_lowercase();
        if needle.is_empty() {
            return Err(CategorizedError::required_field("query"));
        }
        let store = self.store.read();
        let results: Vec<Value> = store
            .iter()
            .filter(|((f, _), v)| {
                *f == family
                    && Self::in_workspace(v, query.workspace_id.as_deref())
                    && Self::matches_text(v, &needle)
            })
            .map(|(_, v)| v.clone())
            .take(query.limit as usize)
            .collect();
        Ok(json!({ "results": results }))
    }

    async fn move_item(&self, ctx: &CallContext, item_id: &str, collection_id: &str) -> Result<Value, CategorizedError> {
        if collection_id.is_empty() {
            return Err(CategorizedError::required_field("collection_id"));
        }
        self.update(ctx, ResourceFamily::Items, item_id, json!({ "collection_id": collection_id }))
            .await
    }
}

//! Shared collaborators of one gateway client.
//!
//! The [`Mediator`] owns references to the connection, resolver, cache and
//! bus, plus a read-only view of the session's identify options. Handlers do
//! not get the mediator itself: [`Mediator::translation_scope`] hands out a
//! [`TranslationScope`] with just the cache, the resolver and the shard.

use std::sync::Arc;
use tokio::sync::watch;

use crate::bus::EventBus;
use crate::cache::EntityCache;
use crate::connection::GatewayConnection;
use crate::payload::Dispatch;
use crate::resolver::EntityResolver;
use crate::session::{IdentifyOptions, ShardInfo};

/// What a dispatch handler may touch.
#[derive(Clone, Copy)]
pub struct TranslationScope<'a> {
    pub cache: &'a EntityCache,
    pub resolver: &'a dyn EntityResolver,
    pub shard: Option<ShardInfo>,
}

impl<'a> TranslationScope<'a> {
    pub fn new(
        cache: &'a EntityCache,
        resolver: &'a dyn EntityResolver,
        shard: Option<ShardInfo>,
    ) -> Self {
        Self {
            cache,
            resolver,
            shard,
        }
    }
}

/// One dispatch paired with the scope it is translated in.
///
/// The borrowed scope ties the context to a single translation call.
pub struct DispatchContext<'a> {
    dispatch: Dispatch,
    scope: TranslationScope<'a>,
}

impl<'a> DispatchContext<'a> {
    pub fn new(dispatch: Dispatch, scope: TranslationScope<'a>) -> Self {
        Self { dispatch, scope }
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    pub fn scope(&self) -> TranslationScope<'a> {
        self.scope
    }

    pub fn into_dispatch(self) -> Dispatch {
        self.dispatch
    }
}

pub struct Mediator {
    connection: Option<Arc<dyn GatewayConnection>>,
    resolver: Arc<dyn EntityResolver>,
    cache: Arc<EntityCache>,
    bus: EventBus,
    identify: watch::Receiver<IdentifyOptions>,
}

impl Mediator {
    pub fn new(
        connection: Option<Arc<dyn GatewayConnection>>,
        resolver: Arc<dyn EntityResolver>,
        cache: Arc<EntityCache>,
        bus: EventBus,
        identify: watch::Receiver<IdentifyOptions>,
    ) -> Self {
        Self {
            connection,
            resolver,
            cache,
            bus,
            identify,
        }
    }

    /// `None` for receiving-side clients.
    pub fn connection(&self) -> Option<&Arc<dyn GatewayConnection>> {
        self.connection.as_ref()
    }

    pub fn resolver(&self) -> &Arc<dyn EntityResolver> {
        &self.resolver
    }

    pub fn cache(&self) -> &Arc<EntityCache> {
        &self.cache
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Latest identify options published by the session owner.
    pub fn identify_options(&self) -> IdentifyOptions {
        self.identify.borrow().clone()
    }

    pub fn shard(&self) -> Option<ShardInfo> {
        self.identify.borrow().shard
    }

    pub fn translation_scope(&self) -> TranslationScope<'_> {
        TranslationScope::new(&self.cache, self.resolver.as_ref(), self.shard())
    }

    /// Pair a dispatch with this mediator's scope.
    pub fn context(&self, dispatch: Dispatch) -> DispatchContext<'_> {
        DispatchContext::new(dispatch, self.translation_scope())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::NoopResolver;
    use crate::session::{SessionState, SessionUpdate};
    use serde_json::json;

    #[test]
    fn test_scope_follows_session_shard() {
        let shard = ShardInfo::new(0, 2).unwrap();
        let mut session = SessionState::new(IdentifyOptions::new().with_shard(shard));
        let mediator = Mediator::new(
            None,
            Arc::new(NoopResolver),
            Arc::new(EntityCache::new()),
            EventBus::new(),
            session.watch(),
        );

        assert_eq!(mediator.translation_scope().shard, Some(shard));
        assert!(mediator.connection().is_none());

        session.apply(SessionUpdate::Identifying).unwrap();
        session
            .apply(SessionUpdate::Ready {
                session_id: "abc".to_string(),
            })
            .unwrap();
        assert_eq!(
            mediator.identify_options().resume.unwrap().session_id,
            "abc"
        );
    }

    #[test]
    fn test_context_carries_dispatch() {
        let mediator = Mediator::new(
            None,
            Arc::new(NoopResolver),
            Arc::new(EntityCache::new()),
            EventBus::new(),
            SessionState::new(IdentifyOptions::new()).watch(),
        );

        let ctx = mediator.context(Dispatch::new("READY", json!({})).with_sequence(3));
        assert_eq!(ctx.dispatch().sequence, Some(3));
        assert!(ctx.scope().shard.is_none());
        assert_eq!(ctx.into_dispatch().kind, "READY");
    }
}

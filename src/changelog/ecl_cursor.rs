use std::sync::Arc;

use crate::core::{Dn, MultiDomainServerState, UpdateMsg};

use super::{ChangelogError, MultiDomainCursor, ReplicationServer};

/// Restricts a merged cursor to domains that publish to the external change
/// log, and to messages that describe directory changes.
pub struct EclMultiDomainCursor {
    inner: Box<dyn MultiDomainCursor>,
    server: Arc<dyn ReplicationServer>,
}

impl EclMultiDomainCursor {
    pub fn new(inner: Box<dyn MultiDomainCursor>, server: Arc<dyn ReplicationServer>) -> Self {
        Self { inner, server }
    }
}

impl MultiDomainCursor for EclMultiDomainCursor {
    fn next(&mut self) -> Result<bool, ChangelogError> {
        while self.inner.next()? {
            let visible = match (self.inner.domain(), self.inner.record()) {
                (Some(domain), Some(msg)) => {
                    msg.is_ldap_update() && self.server.is_ecl_enabled(domain)
                }
                _ => false,
            };
            if visible {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn record(&self) -> Option<&UpdateMsg> {
        self.inner.record()
    }

    fn domain(&self) -> Option<&Dn> {
        self.inner.domain()
    }

    fn to_cookie(&self) -> MultiDomainServerState {
        let mut cookie = self.inner.to_cookie();
        let hidden: Vec<Dn> = cookie
            .domains()
            .filter(|domain| !self.server.is_ecl_enabled(domain))
            .cloned()
            .collect();
        for domain in hidden {
            cookie.remove(&domain);
        }
        cookie
    }
}

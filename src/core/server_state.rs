//! Per-replica positions: `ServerState` for one domain, `MultiDomainServerState`
//! (the client cookie) across domains.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::csn::{Csn, ServerId};
use super::dn::Dn;
use super::error::{CoreError, InvalidId};

/// Highest CSN consumed per replica, scoped to one domain.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerState {
    inner: BTreeMap<ServerId, Csn>,
}

impl ServerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `csn` for its replica. Returns whether the state advanced; a CSN at
    /// or below the current one for that replica is ignored.
    pub fn update(&mut self, csn: Csn) -> bool {
        match self.inner.get(&csn.server_id()) {
            Some(current) if *current >= csn => false,
            _ => {
                self.inner.insert(csn.server_id(), csn);
                true
            }
        }
    }

    pub fn update_all(&mut self, other: &ServerState) {
        for csn in other.inner.values() {
            self.update(*csn);
        }
    }

    pub fn get(&self, server_id: ServerId) -> Option<Csn> {
        self.inner.get(&server_id).copied()
    }

    pub fn csns(&self) -> impl Iterator<Item = Csn> + '_ {
        self.inner.values().copied()
    }

    /// Greatest CSN across all replicas.
    pub fn max_csn(&self) -> Option<Csn> {
        self.inner.values().max().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, csn) in self.inner.values().enumerate() {
            if idx > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{csn}")?;
        }
        Ok(())
    }
}

impl FromIterator<Csn> for ServerState {
    fn from_iter<I: IntoIterator<Item = Csn>>(iter: I) -> Self {
        let mut state = ServerState::new();
        for csn in iter {
            state.update(csn);
        }
        state
    }
}

/// Per-domain server states. Its text form is the opaque client cookie:
/// `dn:csn csn;dn:csn;`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MultiDomainServerState {
    inner: BTreeMap<Dn, ServerState>,
}

impl MultiDomainServerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, domain: &Dn, csn: Csn) -> bool {
        if let Some(state) = self.inner.get_mut(domain) {
            return state.update(csn);
        }
        let mut state = ServerState::new();
        state.update(csn);
        self.inner.insert(domain.clone(), state);
        true
    }

    pub fn update_state(&mut self, domain: &Dn, state: &ServerState) {
        self.inner
            .entry(domain.clone())
            .or_default()
            .update_all(state);
    }

    pub fn merge(&mut self, other: &MultiDomainServerState) {
        for (domain, state) in &other.inner {
            self.update_state(domain, state);
        }
    }

    pub fn get(&self, domain: &Dn) -> Option<&ServerState> {
        self.inner.get(domain)
    }

    pub fn domains(&self) -> impl Iterator<Item = &Dn> + '_ {
        self.inner.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Dn, &ServerState)> + '_ {
        self.inner.iter()
    }

    pub fn remove(&mut self, domain: &Dn) -> Option<ServerState> {
        self.inner.remove(domain)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.values().all(ServerState::is_empty)
    }
}

impl fmt::Display for MultiDomainServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (domain, state) in &self.inner {
            write!(f, "{domain}:{state};")?;
        }
        Ok(())
    }
}

impl FromStr for MultiDomainServerState {
    type Err = CoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| {
            CoreError::from(InvalidId::Cookie {
                raw: raw.to_string(),
                reason,
            })
        };

        let mut cookie = MultiDomainServerState::new();
        for part in raw.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let Some((domain, csns)) = part.split_once(':') else {
                return Err(invalid(format!("domain `{part}` has no `:`")));
            };
            let domain = Dn::parse(domain).map_err(|err| invalid(err.to_string()))?;
            if domain.is_empty() {
                return Err(invalid("empty domain".to_string()));
            }
            let mut state = ServerState::new();
            for csn in csns.split_whitespace() {
                state.update(Csn::parse(csn).map_err(|err| invalid(err.to_string()))?);
            }
            cookie.update_state(&domain, &state);
        }
        Ok(cookie)
    }
}

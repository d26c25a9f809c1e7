use std::collections::HashSet;
use std::sync::{Arc, RwLock};

/// One configured compute server.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerConfig {
    pub name: String,
    pub host: String,
    pub versions: Vec<String>,
    pub available: bool,
}

impl ServerConfig {
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            versions: Vec::new(),
            available: false,
        }
    }

    pub fn localhost() -> Self {
        Self {
            name: "localhost".to_string(),
            host: "127.0.0.1".to_string(),
            versions: vec!["stable".to_string()],
            available: true,
        }
    }
}

/// Reachability probe, injected so tests never touch the network.
pub trait ServerProbe: Send + Sync {
    fn ping(&self, host: &str) -> bool;
}

/// Probe that assumes every host is reachable; used by the simulator
/// engine and as a harmless default.
#[derive(Default)]
pub struct AlwaysUp;

impl ServerProbe for AlwaysUp {
    fn ping(&self, _host: &str) -> bool {
        true
    }
}

/// Explicitly constructed server directory with once-per-session
/// refresh semantics. Shared read-mostly; probing flips the
/// availability flag in place.
pub struct ServerInfos {
    probe: Box<dyn ServerProbe>,
    inner: RwLock<ServerState>,
}

#[derive(Default)]
struct ServerState {
    servers: Vec<ServerConfig>,
    probed: HashSet<String>,
}

impl ServerInfos {
    pub fn new(servers: Vec<ServerConfig>, probe: Box<dyn ServerProbe>) -> Self {
        Self {
            probe,
            inner: RwLock::new(ServerState {
                servers,
                probed: HashSet::new(),
            }),
        }
    }

    pub fn shared(servers: Vec<ServerConfig>, probe: Box<dyn ServerProbe>) -> Arc<Self> {
        Arc::new(Self::new(servers, probe))
    }

    pub fn server_names(&self) -> Vec<String> {
        self.read().servers.iter().map(|s| s.name.clone()).collect()
    }

    pub fn config(&self, name: &str) -> Option<ServerConfig> {
        self.read().servers.iter().find(|s| s.name == name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().servers.iter().any(|s| s.name == name)
    }

    /// Probes `name` and updates its availability flag. Probes at
    /// most once per session unless `force` is set.
    pub fn refresh_one(&self, name: &str, force: bool) -> Option<bool> {
        {
            let state = self.read();
            if !force && state.probed.contains(name) {
                return state
                    .servers
                    .iter()
                    .find(|s| s.name == name)
                    .map(|s| s.available);
            }
        }
        let host = self.config(name)?.host;
        let up = self.probe.ping(&host);
        let mut state = self.write();
        state.probed.insert(name.to_string());
        let server = state.servers.iter_mut().find(|s| s.name == name)?;
        server.available = up;
        Some(up)
    }

    pub fn refresh_all(&self, force: bool) {
        for name in self.server_names() {
            self.refresh_one(&name, force);
        }
    }

    /// Forgets probe results so the next refresh re-probes.
    pub fn reset(&self) {
        self.write().probed.clear();
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ServerState> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ServerState> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CountingProbe {
        pings: Arc<Mutex<usize>>,
        up: bool,
    }

    impl ServerProbe for CountingProbe {
        fn ping(&self, _host: &str) -> bool {
            *self.pings.lock().expect("pings mutex should lock") += 1;
            self.up
        }
    }

    #[test]
    fn refresh_one_probes_once_per_session_unless_forced() {
        let pings = Arc::new(Mutex::new(0));
        let infos = ServerInfos::new(
            vec![ServerConfig::new("c1", "cluster1.local")],
            Box::new(CountingProbe {
                pings: pings.clone(),
                up: true,
            }),
        );

        assert_eq!(infos.refresh_one("c1", false), Some(true));
        assert_eq!(infos.refresh_one("c1", false), Some(true));
        assert_eq!(*pings.lock().expect("pings mutex should lock"), 1);

        assert_eq!(infos.refresh_one("c1", true), Some(true));
        assert_eq!(*pings.lock().expect("pings mutex should lock"), 2);
    }

    #[test]
    fn reset_forgets_probe_results() {
        let infos = ServerInfos::new(
            vec![ServerConfig::new("c1", "cluster1.local")],
            Box::new(AlwaysUp),
        );
        infos.refresh_one("c1", false);
        infos.reset();
        assert_eq!(infos.refresh_one("c1", false), Some(true));
    }

    #[test]
    fn unknown_server_yields_none() {
        let infos = ServerInfos::new(Vec::new(), Box::new(AlwaysUp));
        assert_eq!(infos.refresh_one("ghost", false), None);
        assert!(!infos.contains("ghost"));
    }
}

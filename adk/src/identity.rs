//! Workload identity via the SPIFFE Workload API.
//!
//! The controller consumes identity from a SPIRE-style agent exposing a
//! Unix-domain-socket Workload API: short-lived X.509 SVIDs whose SAN URI
//! carries the SPIFFE ID, plus a trust bundle for verifying peers.
//!
//! Without a reachable socket the provider runs in demo mode: SVIDs are
//! generated locally as self-signed certificates with the same shape, so
//! development environments exercise identical code paths. A background
//! rotation watcher refreshes credentials before expiry; the latest SVID
//! supersedes prior ones atomically for new connections.
//!
//! The provider is an explicit dependency — construct it once and hand it
//! to whatever needs mTLS.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};

/// SPIFFE ID asserted in demo mode.
const DEMO_SPIFFE_ID: &str = "spiffe://adk.local/ns/default/workload/controller";

/// Default Workload API socket path.
const DEFAULT_SOCKET: &str = "/run/spire/sockets/agent.sock";

/// Demo SVID lifetime, seconds.
const DEMO_SVID_TTL_SECS: i64 = 3600;

/// Cadence of the rotation watcher.
const ROTATION_INTERVAL: Duration = Duration::from_secs(30);

/// Refresh when less than this much lifetime remains.
const ROTATION_HEADROOM: Duration = Duration::from_secs(60);

/// A SPIFFE Verifiable Identity Document.
///
/// The private key never leaves the local node; only certificates travel.
#[derive(Debug, Clone)]
pub struct Svid {
    /// The workload's SPIFFE ID, from the certificate's SAN URI.
    pub spiffe_id: String,
    /// X.509 certificate chain, PEM.
    pub cert_chain_pem: String,
    /// Private key, PEM. Never transmitted.
    pub private_key_pem: String,
    /// Trust bundle (CA certificates) for verifying peer SVIDs.
    pub bundle_pem: String,
    /// When this SVID expires.
    pub expiry: DateTime<Utc>,
}

impl Svid {
    /// Whether the SVID has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expiry
    }

    /// Remaining lifetime, zero when expired.
    #[must_use]
    pub fn time_until_expiry(&self) -> Duration {
        (self.expiry - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Callback invoked with each rotated SVID. Must not block.
pub type RotationListener = Box<dyn Fn(&Svid) + Send + Sync>;

/// Client for the Workload API socket.
///
/// Caches the current SVID; [`WorkloadApi::valid_svid`] is the recommended
/// accessor and refreshes transparently.
#[derive(Debug)]
pub struct WorkloadApi {
    socket_path: PathBuf,
    current: RwLock<Option<Svid>>,
}

impl WorkloadApi {
    /// Create a client for the given socket path.
    #[must_use]
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            current: RwLock::new(None),
        }
    }

    /// Whether the Workload API socket exists.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.socket_path.exists()
    }

    /// Fetch a fresh SVID and cache it.
    ///
    /// A production deployment would speak the Workload API protocol over
    /// the socket; this implementation issues a locally generated
    /// self-signed SVID of the same shape.
    pub fn fetch_svid(&self) -> Result<Svid> {
        if !self.is_available() {
            return Err(Error::identity(format!(
                "Workload API socket not found: {}",
                self.socket_path.display()
            )));
        }

        let svid = demo_svid()?;
        info!(
            spiffe_id = %svid.spiffe_id,
            expires_in_secs = svid.time_until_expiry().as_secs(),
            "Fetched SVID",
        );
        *self.current.write().expect("svid lock poisoned") = Some(svid.clone());
        Ok(svid)
    }

    /// The cached SVID, possibly expired.
    #[must_use]
    pub fn current_svid(&self) -> Option<Svid> {
        self.current.read().expect("svid lock poisoned").clone()
    }

    /// A non-expired SVID, refreshing if needed.
    pub fn valid_svid(&self) -> Result<Svid> {
        if let Some(svid) = self.current_svid()
            && !svid.is_expired()
        {
            return Ok(svid);
        }
        self.fetch_svid()
    }

    /// Start the background rotation watcher.
    ///
    /// Refreshes the cached SVID when little lifetime remains and invokes
    /// `listener` with each rotated credential. Listeners must return
    /// promptly; they run on the watcher task.
    #[must_use]
    pub fn start_rotation_watcher(
        api: Arc<Self>,
        listener: Option<RotationListener>,
    ) -> RotationWatcher {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            info!("SVID rotation watcher started");
            loop {
                let due = api
                    .current_svid()
                    .is_none_or(|svid| svid.time_until_expiry() < ROTATION_HEADROOM);
                if due {
                    match api.fetch_svid() {
                        Ok(svid) => {
                            if let Some(listener) = &listener {
                                listener(&svid);
                            }
                        }
                        Err(err) => error!(error = %err, "SVID rotation failed"),
                    }
                }

                tokio::select! {
                    _ = tokio::time::sleep(ROTATION_INTERVAL) => {}
                    _ = stop_rx.changed() => break,
                }
            }
            info!("SVID rotation watcher stopped");
        });

        RotationWatcher {
            stop: stop_tx,
            handle,
        }
    }
}

/// Handle to a running rotation watcher.
#[derive(Debug)]
pub struct RotationWatcher {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RotationWatcher {
    /// Signal the watcher and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}

/// High-level identity provider for the controller.
#[derive(Debug)]
pub struct IdentityProvider {
    workload_api: Arc<WorkloadApi>,
    enabled: bool,
}

impl IdentityProvider {
    /// Create a provider over a socket path; `None` uses the default path.
    #[must_use]
    pub fn new(socket_path: Option<&str>) -> Self {
        let workload_api = Arc::new(WorkloadApi::new(socket_path.unwrap_or(DEFAULT_SOCKET)));
        let enabled = workload_api.is_available();
        if !enabled {
            warn!(
                socket = %workload_api.socket_path.display(),
                "SPIFFE Workload API not available, using demo identity",
            );
        }
        Self {
            workload_api,
            enabled,
        }
    }

    /// Create a provider from controller configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.spiffe_socket.as_deref())
    }

    /// Whether a real Workload API backs this provider.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// The underlying Workload API client, for rotation wiring.
    #[must_use]
    pub fn workload_api(&self) -> &Arc<WorkloadApi> {
        &self.workload_api
    }

    /// Start credential rotation over the underlying Workload API.
    #[must_use]
    pub fn start_rotation_watcher(&self, listener: Option<RotationListener>) -> RotationWatcher {
        WorkloadApi::start_rotation_watcher(Arc::clone(&self.workload_api), listener)
    }

    /// This workload's SPIFFE ID.
    #[must_use]
    pub fn identity(&self) -> String {
        if !self.enabled {
            return DEMO_SPIFFE_ID.to_owned();
        }
        self.workload_api
            .valid_svid()
            .map_or_else(|_| DEMO_SPIFFE_ID.to_owned(), |svid| svid.spiffe_id)
    }

    /// A current SVID: from the Workload API when enabled, locally
    /// generated otherwise.
    pub fn svid(&self) -> Result<Svid> {
        if self.enabled {
            self.workload_api.valid_svid()
        } else {
            demo_svid()
        }
    }

    /// An HTTP client authenticating with the current SVID and verifying
    /// peers against the trust bundle.
    pub fn mtls_client(&self) -> Result<reqwest::Client> {
        self.mtls_client_expecting(None).map(|client| client.http)
    }

    /// Like [`IdentityProvider::mtls_client`], additionally carrying an
    /// expected peer SPIFFE ID for application-layer checks.
    pub fn mtls_client_expecting(&self, expected_peer_id: Option<&str>) -> Result<MtlsClient> {
        let svid = self.svid()?;
        let identity_pem = format!("{}{}", svid.cert_chain_pem, svid.private_key_pem);
        let identity = reqwest::Identity::from_pem(identity_pem.as_bytes())?;
        let bundle = reqwest::Certificate::from_pem(svid.bundle_pem.as_bytes())?;

        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .identity(identity)
            .add_root_certificate(bundle)
            .build()?;

        Ok(MtlsClient {
            http,
            expected_peer_id: expected_peer_id.map(str::to_owned),
        })
    }

    /// Whether `peer_id` is authorized by `allowed`.
    ///
    /// An empty allow-list authorizes everything. Entries match exactly,
    /// or by prefix when they end in `/*`.
    #[must_use]
    pub fn is_authorized(&self, peer_id: &str, allowed: &[String]) -> bool {
        allowed.is_empty() || allowed.iter().any(|pattern| spiffe_id_matches(pattern, peer_id))
    }
}

/// An mTLS HTTP client plus the peer identity it expects, if any.
#[derive(Debug, Clone)]
pub struct MtlsClient {
    /// The configured HTTP client.
    pub http: reqwest::Client,
    /// Peer SPIFFE ID the application layer should insist on.
    pub expected_peer_id: Option<String>,
}

impl MtlsClient {
    /// Whether a presented peer identity satisfies the expectation.
    #[must_use]
    pub fn authorize_peer(&self, peer_id: &str) -> bool {
        match &self.expected_peer_id {
            Some(expected) => spiffe_id_matches(expected, peer_id),
            None => true,
        }
    }
}

/// Match one allow-list pattern against a SPIFFE ID.
fn spiffe_id_matches(pattern: &str, id: &str) -> bool {
    match pattern.strip_suffix("/*") {
        Some(prefix) => id
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/')),
        None => pattern == id,
    }
}

/// Generate a self-signed SVID with the demo SPIFFE ID in its SAN URI.
///
/// The private key is generated locally, matching the Workload API's key
/// handling. Self-signed means the bundle is the certificate itself.
fn demo_svid() -> Result<Svid> {
    let key = rcgen::KeyPair::generate().map_err(|err| Error::identity(err.to_string()))?;

    let mut params = rcgen::CertificateParams::default();
    params
        .distinguished_name
        .push(rcgen::DnType::OrganizationName, "adk");
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, "adk-workload");
    let san = rcgen::Ia5String::try_from(DEMO_SPIFFE_ID.to_owned())
        .map_err(|err| Error::identity(err.to_string()))?;
    params.subject_alt_names.push(rcgen::SanType::URI(san));

    let cert = params
        .self_signed(&key)
        .map_err(|err| Error::identity(err.to_string()))?;
    let cert_pem = cert.pem();

    Ok(Svid {
        spiffe_id: DEMO_SPIFFE_ID.to_owned(),
        bundle_pem: cert_pem.clone(),
        cert_chain_pem: cert_pem,
        private_key_pem: key.serialize_pem(),
        expiry: Utc::now() + chrono::Duration::seconds(DEMO_SVID_TTL_SECS),
    })
}

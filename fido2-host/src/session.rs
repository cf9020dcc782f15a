//! Device sessions
//!
//! A [`DeviceSession`] owns one open authenticator: its CTAPHID channel, the
//! capability snapshot from GetInfo and the state needed between commands.
//! Exactly one command runs at a time; a second caller gets
//! [`Error::SessionBusy`] instead of blocking on the device.

use crate::capabilities::Capabilities;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::pin::{self, PinUvAuthContext, permissions};
use crate::request::{GetAssertionRequest, MakeCredentialRequest, Pin};
use crate::response::{AssertionResult, AttestationResult};

use fido2_host_crypto::PinProtocol;
use fido2_host_ctap::commands::get_assertion::GetAssertion;
use fido2_host_ctap::commands::get_info::{AuthenticatorInfo, GetInfo};
use fido2_host_ctap::commands::get_next_assertion::GetNextAssertion;
use fido2_host_ctap::commands::make_credential::MakeCredential;
use fido2_host_ctap::extensions::{self, MakeCredentialExtensions, ext_ids};
use fido2_host_ctap::{Command, StatusCode};
use fido2_host_transport::ctaphid::MAX_MESSAGE_SIZE;
use fido2_host_transport::{CancelToken, Cmd, CtapHidInfo, Framer, HidConnector, HidDevice};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, TryLockError};
use std::thread;

use log::{debug, info, warn};

/// State only touched while a command holds the session
struct Inner<D> {
    device: D,
    framer: Framer,
    /// Set by an error that makes the session unusable
    terminal: Option<Error>,
    /// Shared secret and salt length of the last getAssertion, for
    /// decrypting hmac-secret in getNextAssertion
    pending_hmac_secret: Option<(PinUvAuthContext, usize)>,
}

/// An open authenticator
///
/// All operations take `&self`; the session is `Send + Sync` when the device
/// is `Send`, so it can be shared across threads with an `Arc`.
pub struct DeviceSession<D: HidDevice> {
    inner: Mutex<Inner<D>>,
    capabilities: RwLock<Arc<Capabilities>>,
    ctaphid_info: CtapHidInfo,
    config: SessionConfig,
}

impl<D: HidDevice> core::fmt::Debug for DeviceSession<D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("ctaphid_info", &self.ctaphid_info)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<D: HidDevice> DeviceSession<D> {
    /// Open the device at `path`, allocate a channel and read GetInfo
    pub fn open<C>(connector: &C, path: &str, config: SessionConfig) -> Result<Self>
    where
        C: HidConnector<Device = D>,
    {
        let device = connector
            .open(path)
            .map_err(|e| Error::DeviceOpen(format!("{path}: {e}")))?;
        Self::with_device(device, config)
    }

    /// Start a session on an already opened device
    pub fn with_device(mut device: D, config: SessionConfig) -> Result<Self> {
        let (framer, ctaphid_info) = Framer::init(&mut device, config.timeouts())
            .map_err(|e| Error::DeviceOpen(format!("CTAPHID_INIT failed: {e}")))?;
        if !ctaphid_info.has_cbor() {
            return Err(Error::DeviceOpen("device does not support CTAP2".into()));
        }

        let response = framer
            .transact(&mut device, Cmd::Cbor, &GetInfo.encode()?, MAX_MESSAGE_SIZE, None)
            .map_err(|e| Error::DeviceOpen(format!("GetInfo failed: {e}")))?;
        let info: AuthenticatorInfo = GetInfo::decode(&response)
            .map_err(|e| Error::DeviceOpen(format!("GetInfo failed: {e}")))?;
        info!(
            "opened authenticator cid={:08x} versions={:?} extensions={:?}",
            framer.cid(),
            info.versions,
            info.extensions
        );

        Ok(Self {
            inner: Mutex::new(Inner {
                device,
                framer,
                terminal: None,
                pending_hmac_secret: None,
            }),
            capabilities: RwLock::new(Arc::new(Capabilities::new(info))),
            ctaphid_info,
            config,
        })
    }

    /// Current capability snapshot
    pub fn capabilities(&self) -> Arc<Capabilities> {
        self.capabilities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// CTAPHID_INIT response from open
    pub fn ctaphid_info(&self) -> &CtapHidInfo {
        &self.ctaphid_info
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Re-fetch GetInfo and replace the capability snapshot
    pub fn get_info(&self) -> Result<Arc<Capabilities>> {
        self.run(|inner| self.refresh(inner, None))
    }

    pub fn make_credential(&self, request: &MakeCredentialRequest) -> Result<AttestationResult> {
        self.make_credential_cancellable(request, None)
    }

    /// Create a credential, aborting when `cancel` is set
    pub fn make_credential_cancellable(
        &self,
        request: &MakeCredentialRequest,
        cancel: Option<&CancelToken>,
    ) -> Result<AttestationResult> {
        let extensions = MakeCredentialExtensions {
            hmac_secret: request.hmac_secret,
            cred_protect: request.cred_protect,
        };
        self.run(|inner| {
            self.with_capability_refresh(
                inner,
                cancel,
                |caps| check_extensions(caps, &extensions.requested()),
                |inner, caps| self.send_make_credential(inner, caps, request, extensions, cancel),
            )
        })
    }

    pub fn get_assertion(&self, request: &GetAssertionRequest) -> Result<AssertionResult> {
        self.get_assertion_cancellable(request, None)
    }

    /// Get an assertion, aborting when `cancel` is set
    pub fn get_assertion_cancellable(
        &self,
        request: &GetAssertionRequest,
        cancel: Option<&CancelToken>,
    ) -> Result<AssertionResult> {
        let requested: &[&str] = if request.hmac_secret_salts().is_some() {
            &[ext_ids::HMAC_SECRET]
        } else {
            &[]
        };
        self.run(|inner| {
            self.with_capability_refresh(
                inner,
                cancel,
                |caps| check_extensions(caps, requested),
                |inner, caps| self.send_get_assertion(inner, caps, request, cancel),
            )
        })
    }

    /// Next assertion after a getAssertion that reported several credentials
    pub fn get_next_assertion(&self) -> Result<AssertionResult> {
        self.get_next_assertion_cancellable(None)
    }

    pub fn get_next_assertion_cancellable(
        &self,
        cancel: Option<&CancelToken>,
    ) -> Result<AssertionResult> {
        self.run(|inner| {
            // The hmac-secret context stays put if this call fails
            let response = self.execute(inner, &GetNextAssertion, cancel)?;
            let mut result = AssertionResult::from_response(response);
            if let Some((ctx, salts_len)) = &inner.pending_hmac_secret {
                result.hmac_secret = decrypt_hmac_secret(&result, ctx, *salts_len)?;
            }
            Ok(result)
        })
    }

    /// Release the device
    pub fn close(self) {
        let mut inner = self
            .inner
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        debug!("closing session cid={:08x}", inner.framer.cid());
        inner.device.close();
    }

    /// Take the session for one command
    fn lock(&self) -> Result<MutexGuard<'_, Inner<D>>> {
        match self.inner.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::WouldBlock) => Err(Error::SessionBusy),
            // A panicking caller leaves no half-sent command behind: every
            // exchange finishes or aborts before returning.
            Err(TryLockError::Poisoned(poisoned)) => {
                warn!("recovering session lock after a panic");
                Ok(poisoned.into_inner())
            }
        }
    }

    /// Run `op` holding the session, latching terminal errors
    fn run<T>(&self, op: impl FnOnce(&mut Inner<D>) -> Result<T>) -> Result<T> {
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        if let Some(err) = &inner.terminal {
            return Err(err.clone());
        }
        let result = op(inner);
        if let Err(err) = &result {
            if err.is_terminal() {
                warn!("session unusable until reopened: {err}");
                inner.terminal = Some(err.clone());
            }
        }
        result
    }

    /// Send, and on a capability mismatch re-read GetInfo and send once more
    fn with_capability_refresh<T, P, S>(
        &self,
        inner: &mut Inner<D>,
        cancel: Option<&CancelToken>,
        precheck: P,
        mut send: S,
    ) -> Result<T>
    where
        P: Fn(&Capabilities) -> Result<()>,
        S: FnMut(&mut Inner<D>, &Capabilities) -> Result<T>,
    {
        let caps = self.capabilities();
        precheck(&caps)?;
        match send(inner, &caps) {
            Err(err) if err.is_capability_mismatch() => {
                warn!("device rejected the request ({err}), refreshing capabilities");
                let caps = self.refresh(inner, cancel)?;
                precheck(&caps)?;
                send(inner, &caps)
            }
            other => other,
        }
    }

    fn refresh(
        &self,
        inner: &mut Inner<D>,
        cancel: Option<&CancelToken>,
    ) -> Result<Arc<Capabilities>> {
        let info = self.execute(inner, &GetInfo, cancel)?;
        let caps = Arc::new(Capabilities::new(info));
        *self
            .capabilities
            .write()
            .unwrap_or_else(PoisonError::into_inner) = caps.clone();
        debug!("capability snapshot replaced");
        Ok(caps)
    }

    /// One CTAP2 command over CTAPHID_CBOR
    fn execute<C: Command>(
        &self,
        inner: &mut Inner<D>,
        command: &C,
        cancel: Option<&CancelToken>,
    ) -> Result<C::Response> {
        let request = command.encode()?;
        debug!("sending {:?} ({} bytes)", C::CODE, request.len());
        let response = self.transact(inner, &request, cancel)?;
        match C::decode(&response) {
            Ok(decoded) => Ok(decoded),
            Err(err) => {
                debug!("{:?} failed: {err}", C::CODE);
                Err(err.into())
            }
        }
    }

    /// Exchange a CBOR message, retrying a busy channel with backoff
    fn transact(
        &self,
        inner: &mut Inner<D>,
        request: &[u8],
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<u8>> {
        let max_size = self.capabilities().max_message_size();
        let policy = self.config.retry;
        let mut attempt = 1;
        loop {
            match inner
                .framer
                .transact(&mut inner.device, Cmd::Cbor, request, max_size, cancel)
                .map_err(Error::from)
            {
                Err(err) if err.is_busy() && attempt < policy.max_attempts => {
                    attempt += 1;
                    let wait = policy.backoff(attempt);
                    debug!("channel busy, attempt {attempt} in {wait:?}");
                    thread::sleep(wait);
                    if cancel.is_some_and(CancelToken::is_cancelled) {
                        return Err(Error::Cancelled);
                    }
                }
                other => return other,
            }
        }
    }

    /// Negotiate a token with the PIN, if the device takes one
    fn negotiate_pin(
        &self,
        inner: &mut Inner<D>,
        caps: &Capabilities,
        pin: Option<&Pin>,
        permissions: u8,
        rp_id: &str,
        cancel: Option<&CancelToken>,
    ) -> Result<Option<PinUvAuthContext>> {
        let Some(pin) = pin else {
            return Ok(None);
        };
        if !caps.pin_configured() {
            warn!("device has no PIN configured, ignoring the supplied PIN");
            return Ok(None);
        }
        let ctx = pin::negotiate(caps, pin.as_str(), permissions, Some(rp_id), &mut |cmd| {
            self.execute(inner, cmd, cancel)
        })?;
        Ok(Some(ctx))
    }

    fn send_make_credential(
        &self,
        inner: &mut Inner<D>,
        caps: &Capabilities,
        request: &MakeCredentialRequest,
        extensions: MakeCredentialExtensions,
        cancel: Option<&CancelToken>,
    ) -> Result<AttestationResult> {
        inner.pending_hmac_secret = None;
        let client_data_hash = *request.client_data_hash.as_bytes();

        let mut command = MakeCredential::new(
            client_data_hash,
            request.rp.clone(),
            request.user.clone(),
        );
        command.algorithms = request.algorithms.clone();
        command.exclude_list = request.exclude_list.clone();
        command.extensions = extensions;
        command.resident_key = request.resident_key;
        command.user_verification = request.user_verification;

        let pin_ctx = self.negotiate_pin(
            inner,
            caps,
            request.pin.as_ref(),
            permissions::MAKE_CREDENTIAL,
            &request.rp.id,
            cancel,
        )?;
        if let Some(mut ctx) = pin_ctx {
            command.pin_uv_auth_param = Some(ctx.pin_uv_auth_param(&client_data_hash)?);
            command.pin_uv_auth_protocol = Some(ctx.protocol().version());
        }

        let response = self.execute(inner, &command, cancel)?;
        AttestationResult::from_response(response, request.client_data_hash)
    }

    fn send_get_assertion(
        &self,
        inner: &mut Inner<D>,
        caps: &Capabilities,
        request: &GetAssertionRequest,
        cancel: Option<&CancelToken>,
    ) -> Result<AssertionResult> {
        inner.pending_hmac_secret = None;
        let client_data_hash = *request.client_data_hash.as_bytes();

        let mut command = GetAssertion::new(request.rp_id.clone(), client_data_hash);
        command.allow_list = request.allow_list.clone();
        command.user_presence = request.user_presence;
        command.user_verification = request.user_verification;

        let mut ctx = self.negotiate_pin(
            inner,
            caps,
            request.pin.as_ref(),
            permissions::GET_ASSERTION,
            &request.rp_id,
            cancel,
        )?;
        if let Some(ctx) = ctx.as_mut() {
            command.pin_uv_auth_param = Some(ctx.pin_uv_auth_param(&client_data_hash)?);
            command.pin_uv_auth_protocol = Some(ctx.protocol().version());
        }

        let salts = request.hmac_secret_salts();
        if let Some(salts) = salts {
            // No PIN: key agreement only, for the salt encryption
            if ctx.is_none() {
                let protocol = caps.preferred_pin_protocol().unwrap_or(PinProtocol::V1);
                let mut fresh = PinUvAuthContext::new(protocol);
                fresh.establish(&mut |cmd| self.execute(inner, cmd, cancel))?;
                ctx = Some(fresh);
            }
            if let Some(shared) = &ctx {
                command.extensions.hmac_secret = Some(shared.hmac_secret_input(salts)?);
            }
        }

        let response = self.execute(inner, &command, cancel)?;
        let mut result = AssertionResult::from_response(response);
        result.fill_credential_id(&request.allow_list);

        if let (Some(ctx), Some(salts)) = (ctx, salts) {
            result.hmac_secret = decrypt_hmac_secret(&result, &ctx, salts.len())?;
            if result.number_of_credentials.is_some_and(|n| n > 1) {
                inner.pending_hmac_secret = Some((ctx, salts.len()));
            }
        }
        Ok(result)
    }
}

/// Fail before sending when the device does not advertise an extension
fn check_extensions(caps: &Capabilities, requested: &[&str]) -> Result<()> {
    match requested.iter().find(|id| !caps.supports_extension(id)) {
        Some(id) => {
            warn!("device does not advertise the {id} extension");
            Err(Error::Command(StatusCode::UnsupportedExtension.to_u8()))
        }
        None => Ok(()),
    }
}

fn decrypt_hmac_secret(
    result: &AssertionResult,
    ctx: &PinUvAuthContext,
    salts_len: usize,
) -> Result<Option<Vec<u8>>> {
    match extensions::hmac_secret_output(&result.auth_data)? {
        Some(encrypted) => ctx.decrypt_hmac_secret(&encrypted, salts_len).map(Some),
        None => {
            debug!("no hmac-secret output in the assertion");
            Ok(None)
        }
    }
}

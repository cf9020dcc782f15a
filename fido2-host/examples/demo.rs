//! Describe every USB authenticator, then register and authenticate
//! against the first one
//!
//! Each device gets its CTAPHID INIT details and GetInfo printed. On the
//! first device the demo creates a discoverable credential with
//! hmac-secret, then gets an assertion and evaluates hmac-secret with a
//! fixed salt. Touch the device when it blinks.
//!
//! # Usage
//! ```bash
//! RUST_LOG=debug cargo run --example demo --features usb
//! FIDO2_PIN=1234 cargo run --example demo --features usb
//! ```
//!
//! The PIN is only used when the device has one set.

use fido2_host::{
    ClientDataHash, DeviceLocation, DeviceSession, GetAssertionRequest, HidDevice,
    MakeCredentialRequest, PublicKeyCredentialDescriptor, RelyingParty, Result, SessionConfig,
    UsbConnector, User,
};

use sha2::{Digest, Sha256};

const RP_ID: &str = "demo.example.com";

fn client_data_hash(kind: &str) -> ClientDataHash {
    let challenge: [u8; 32] = rand::random();
    let client_data = format!(
        r#"{{"type":"{kind}","challenge":"{}","origin":"https://{RP_ID}"}}"#,
        hex::encode(challenge)
    );
    ClientDataHash::new(Sha256::digest(client_data.as_bytes()).into())
}

fn describe<D: HidDevice>(location: &DeviceLocation, session: &DeviceSession<D>) {
    println!(
        "{} ({:04x}:{:04x}) at {}",
        location.product.as_deref().unwrap_or("unknown device"),
        location.vendor_id,
        location.product_id,
        location.path
    );

    let hid = session.ctaphid_info();
    println!("  CTAPHID protocol: {}", hid.protocol_version);
    println!(
        "  device version:   {}.{}.{}",
        hid.major_version, hid.minor_version, hid.build_version
    );
    println!(
        "  capabilities:     0x{:02x} (wink {}, cbor {}, msg {})",
        hid.capabilities,
        hid.has_wink(),
        hid.has_cbor(),
        hid.has_msg()
    );

    let caps = session.capabilities();
    let info = caps.info();
    println!("  versions:         {:?}", info.versions);
    println!("  extensions:       {:?}", info.extensions);
    println!("  aaguid:           {}", hex::encode(caps.aaguid()));
    println!("  options:          {:?}", info.options);
    println!("  max msg size:     {}", caps.max_message_size());
    println!("  PIN protocols:    {:?}", info.pin_uv_auth_protocols);
    println!("  algorithms:       {:?}", info.algorithms);
    println!("  PIN set:          {}", caps.pin_configured());
}

fn main() -> Result<()> {
    env_logger::init();

    let mut connector = UsbConnector::new()?;
    let locations = connector.device_locations()?;
    if locations.is_empty() {
        eprintln!("No FIDO2 device found");
        return Ok(());
    }

    let mut first = None;
    for location in &locations {
        let session =
            match DeviceSession::open(&connector, &location.path, SessionConfig::default()) {
                Ok(session) => session,
                Err(err) => {
                    eprintln!("{}: {err}", location.path);
                    continue;
                }
            };
        describe(location, &session);
        println!();
        if first.is_none() {
            first = Some(session);
        } else {
            session.close();
        }
    }
    let Some(session) = first else {
        eprintln!("No FIDO2 device could be opened");
        return Ok(());
    };

    let pin = std::env::var("FIDO2_PIN").ok();

    println!("\nMakeCredential, touch the device...");
    let mut request = MakeCredentialRequest::new(
        client_data_hash("webauthn.create"),
        RelyingParty::with_name(RP_ID, "fido2-host demo"),
        User::with_details(rand::random::<[u8; 16]>().to_vec(), "demo", "Demo User"),
    )
    .with_resident_key(true)
    .with_hmac_secret();
    if let Some(pin) = &pin {
        request = request.with_pin(pin.as_str());
    }
    let attestation = session.make_credential(&request)?;
    println!("  type:          {}", attestation.credential_type());
    println!("  credential id: {}", hex::encode(&attestation.credential_id));
    println!("  format:        {}", attestation.fmt);
    println!("  hmac-secret:   {}", attestation.hmac_secret);

    println!("\nGetAssertion, touch the device...");
    let mut request = GetAssertionRequest::new(client_data_hash("webauthn.get"), RP_ID)
        .with_credential(PublicKeyCredentialDescriptor::new(
            attestation.credential_id.clone(),
        ))
        .with_hmac_secret(&[0x5A; 32], None)?;
    if let Some(pin) = &pin {
        request = request.with_pin(pin.as_str());
    }
    let assertion = session.get_assertion(&request)?;
    println!("  sign count: {}", assertion.auth_data.sign_count);
    println!("  signature:  {}", hex::encode(&assertion.signature));
    if let Some(secret) = &assertion.hmac_secret {
        println!("  hmac-secret output: {}", hex::encode(secret));
    }

    session.close();
    Ok(())
}

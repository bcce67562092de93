use rand::prelude::*;
use chrono::prelude::*;
use uuid::Uuid;
use tracing::debug;
use crate::api::{SIG_HEADER, TIMESTAMP_HEADER, USER_HEADER};
use crate::store::Store;
use crate::{AppError, User};

pub type PrivateKey     = [u8; 64];
pub type PublicKey      = [u8; 32];

/// max allowed distance between request timestamp and server clock
pub const MAX_TIMESTAMP_SKEW_SECS: i64 = 300;

pub fn gen_keypair() -> (PrivateKey, PublicKey) {
    let mut seed = [0u8; 32];
    let mut rng = thread_rng();
    rng.fill(&mut seed[..]);
    crypto::ed25519::keypair(&seed[..])
}

/// the bytes covered by a request signature: timestamp, method, path and query, body
fn signature_contents(buf: &mut Vec<u8>, timestamp: &[u8], method: &str, path: &str, body: &[u8]) {
    buf.clear();
    buf.extend_from_slice(timestamp);
    buf.extend_from_slice(method.as_bytes());
    buf.extend_from_slice(path.as_bytes());
    buf.extend_from_slice(body);
}

/// check request signature using provided public key
pub fn verify_request(
    sig: &[u8],
    timestamp: &[u8],
    method: &str,
    path: &str,
    body: &[u8],
    pub_key: &[u8],
    buf: &mut Vec<u8>,
) -> bool {
    signature_contents(buf, timestamp, method, path, body);
    let n = buf.len();
    if base64::decode_config_buf(sig, base64::STANDARD, buf).is_err() {
        return false
    }
    let msg = &buf[..n];
    let decoded_sig = &buf[n..];

    // ed25519::verify indexes into both slices
    if pub_key.len() != 32 || decoded_sig.len() != 64 {
        return false
    }

    crypto::ed25519::verify(msg, pub_key, decoded_sig)
}

/// generate base64-encoded signature using provided private key
pub fn sign_request(unix_timestamp: i64, method: &str, path: &str, body: &[u8], priv_key: &PrivateKey) -> String {
    let mut buf = Vec::with_capacity(64 + path.len() + body.len());
    signature_contents(&mut buf, unix_timestamp.to_string().as_bytes(), method, path, body);
    let sig = crypto::ed25519::signature(&buf[..], &priv_key[..]);
    base64::encode(&sig[..])
}

fn header<'a>(req: &'a http::Request<bytes::Bytes>, name: &'static str) -> Result<&'a str, AppError> {
    req.headers().get(name)
        .and_then(|x| x.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized(format!("missing header: {}", name)))
}

/// resolve the calling user of a signed request
pub async fn authenticate(
    store: &dyn Store,
    req: &http::Request<bytes::Bytes>,
    now: DateTime<Utc>,
) -> Result<User, AppError> {
    let user_id: Uuid = header(req, USER_HEADER)?
        .parse()
        .map_err(|_| AppError::Unauthorized(format!("invalid header: {}", USER_HEADER)))?;
    let sig = header(req, SIG_HEADER)?;
    let timestamp = header(req, TIMESTAMP_HEADER)?;

    let unix_ts: i64 = timestamp.parse()
        .map_err(|_| AppError::Unauthorized(format!("invalid header: {}", TIMESTAMP_HEADER)))?;
    let skew = now.timestamp().checked_sub(unix_ts).and_then(i64::checked_abs);
    if skew.map(|s| s > MAX_TIMESTAMP_SKEW_SECS).unwrap_or(true) {
        debug!(%user_id, unix_ts, "stale request timestamp");
        return Err(AppError::Unauthorized("stale timestamp".into()))
    }

    let user = store.get_user(user_id).await?
        .ok_or_else(|| {
            debug!(%user_id, "user not found");
            AppError::Unauthorized("unknown user".into())
        })?;

    let path = req.uri().path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let mut buf = Vec::with_capacity(1024);
    if !verify_request(
        sig.as_bytes(),
        timestamp.as_bytes(),
        req.method().as_str(),
        path,
        &req.body()[..],
        &user.public_key[..],
        &mut buf,
    ) {
        debug!(%user_id, "verify_request failed");
        return Err(AppError::Unauthorized("invalid signature".into()))
    }

    if !user.active {
        debug!(%user_id, "inactive account");
        return Err(AppError::Forbidden("account is awaiting activation".into()))
    }

    Ok(user)
}

//! RFC 5054 compliant SRP-6a implementation.
//!
//! Ref: http://srp.stanford.edu/design.html
//!
//! All public values cross the wire left-padded to the group size, so the
//! byte layout of a challenge never depends on the identity being known.
//! Unknown identities are answered with a deterministic fake salt and a
//! random fake nonce; the responder's behavior is otherwise identical.

use crate::identity::IdentityRecord;
use num_bigint::BigUint;
use rand::RngCore;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Salt size in bytes for registration and for the fake-salt path.
pub const SALT_LENGTH: usize = 32;
/// Secret ephemeral value size in bytes.
const SECRET_LENGTH: usize = 32;

const PRIME_1024: &str = "EEAF0AB9ADB38DD69C33F80AFA8FC5E86072618775FF3C0B9EA2314C9C256576\
                          D674DF7496EA81D3383B4813D692C6E0E0D5D8E250B98BE48E495C1D6089DAD1\
                          5DC7D7B46154D6B6CE8EF4AD69B15D4982559B297BCF1885C529F566660E57EC\
                          68EDBC3C05726CC02FD4CBF4976EAA9AFD5138FE8376435B9FC61D2FC0EB06E3";

const PRIME_2048: &str = "AC6BDB41324A9A9BF166DE5E1389582FAF72B6651987EE07FC3192943DB56050\
                          A37329CBB4A099ED8193E0757767A13DD52312AB4B03310DCD7F48A9DA04FD50\
                          E8083969EDB767B0CF6095179A163AB3661A05FBD5FAAAE82918A9962F0B93B8\
                          55F97993EC975EEAA80D740ADBF4FF747359D041D5C33EA71D281E446B14773B\
                          CA97B43A23FB801676BD207A436C6481F1D2B9078717461A5B9D32E688F87748\
                          544523B524B0D57D5EA77A2775D2ECFA032CFBDBF52FB3786160279004E57AE6\
                          AF874E7303CE53299CCC041C7BC308D82A5698F3A8D0C38271AE35F8E9DBFBB6\
                          94B5C803D89F7AE435DE236D525F54759B65E372FCD68EF20FA7111F9E4AFF73";

const PRIME_3072: &str = "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
                          020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
                          4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
                          EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05\
                          98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB\
                          9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
                          E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718\
                          3995497CEA956AE515D2261898FA051015728E5A8AAAC42DAD33170D04507A33\
                          A85521ABDF1CBA64ECFB850458DBEF0A8AEA71575D060C7DB3970F85A6E1E4C7\
                          ABF5AE8CDB0933D71E8C94E04A25619DCEE3D2261AD2EE6BF12FFA06D98A0864\
                          D87602733EC86A64521F2B18177B200CBBE117577A615D6C770988C0BAD946E2\
                          08E24FA074E5AB3143DB5BFCE0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF";

/// Supported prime group sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrpGroup {
    G1024,
    G2048,
    G3072,
}

impl SrpGroup {
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            1024 => Some(Self::G1024),
            2048 => Some(Self::G2048),
            3072 => Some(Self::G3072),
            _ => None,
        }
    }

    /// Group size in bytes; every padded public value has this length.
    pub fn size(&self) -> usize {
        match self {
            Self::G1024 => 128,
            Self::G2048 => 256,
            Self::G3072 => 384,
        }
    }

    fn prime(&self) -> BigUint {
        let hex = match self {
            Self::G1024 => PRIME_1024,
            Self::G2048 => PRIME_2048,
            Self::G3072 => PRIME_3072,
        };
        BigUint::parse_bytes(hex.as_bytes(), 16).expect("builtin prime group")
    }

    fn generator(&self) -> BigUint {
        match self {
            Self::G1024 | Self::G2048 => BigUint::from(2u32),
            Self::G3072 => BigUint::from(5u32),
        }
    }
}

/// Digest used for all SRP hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrpHash {
    Sha256,
    Sha512,
}

impl SrpHash {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sha256" => Some(Self::Sha256),
            "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }

    /// Digest length, which is also the session key and proof length.
    pub fn length(&self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    fn digest(&self, parts: &[&[u8]]) -> Vec<u8> {
        match self {
            Self::Sha256 => {
                let mut h = Sha256::new();
                for part in parts {
                    h.update(part);
                }
                h.finalize().to_vec()
            }
            Self::Sha512 => {
                let mut h = Sha512::new();
                for part in parts {
                    h.update(part);
                }
                h.finalize().to_vec()
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum AuthError {
    /// Proof mismatch or unknown identity. Carries no detail on purpose.
    Rejected,
    /// A protocol value was out of range or the state machine was driven
    /// out of order.
    BadParameter,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::Rejected => write!(f, "authentication rejected"),
            AuthError::BadParameter => write!(f, "invalid authentication parameter"),
        }
    }
}

impl std::error::Error for AuthError {}

/// SRP-6a context. Drives both roles; the role decides which loaders run.
pub struct Srp {
    group: SrpGroup,
    hash: SrpHash,
    n: BigUint,
    g: BigUint,
    /// Multiplier parameter, k = H(N | PAD(g)).
    k: BigUint,
    salt: Vec<u8>,
    /// Private key x = H(s | H(I | ":" | p)), user role only.
    x: BigUint,
    /// Password verifier v = g^x.
    v: BigUint,
    secret_user: BigUint,
    secret_host: BigUint,
    /// Public ephemeral values A = g^a and B = kv + g^b.
    nonce_user: BigUint,
    nonce_host: BigUint,
    /// Scrambling parameter u = H(PAD(A) | PAD(B)).
    u: BigUint,
    /// Session key K = H(PAD(S)).
    key: Zeroizing<Vec<u8>>,
    /// User -> host proof M = H(H(N) xor H(g), H(I), s, PAD(A), PAD(B), K).
    proof_user: Vec<u8>,
    /// Host -> user proof H(PAD(A), M, K).
    proof_host: Vec<u8>,
}

impl Srp {
    pub fn new(group: SrpGroup, hash: SrpHash) -> Self {
        let n = group.prime();
        let g = group.generator();
        let g_padded = pad_to(&g, group.size());
        let k = BigUint::from_bytes_be(&hash.digest(&[&n.to_bytes_be(), &g_padded]));
        Self {
            group,
            hash,
            n,
            g,
            k,
            salt: Vec::new(),
            x: BigUint::default(),
            v: BigUint::default(),
            secret_user: BigUint::default(),
            secret_host: BigUint::default(),
            nonce_user: BigUint::default(),
            nonce_host: BigUint::default(),
            u: BigUint::default(),
            key: Zeroizing::new(Vec::new()),
            proof_user: Vec::new(),
            proof_host: Vec::new(),
        }
    }

    pub fn group_size(&self) -> usize {
        self.group.size()
    }

    pub fn key_size(&self) -> usize {
        self.hash.length()
    }

    pub fn load_random_salt(&mut self) {
        let mut salt = vec![0u8; SALT_LENGTH];
        rand::thread_rng().fill_bytes(&mut salt);
        self.salt = salt;
    }

    pub fn load_salt(&mut self, salt: &[u8]) -> Result<(), AuthError> {
        if salt.is_empty() || salt.len() > self.group.size() {
            return Err(AuthError::BadParameter);
        }
        self.salt = salt.to_vec();
        Ok(())
    }

    /// Derives the private key from the identity and password, applying the
    /// configured number of hash rounds to the inner digest.
    pub fn load_private_key(
        &mut self,
        identity: &[u8],
        password: &[u8],
        rounds: u32,
    ) -> Result<(), AuthError> {
        if self.salt.is_empty() || rounds == 0 {
            return Err(AuthError::BadParameter);
        }
        let mut inner = self.hash.digest(&[identity, b":", password]);
        for _ in 1..rounds {
            inner = self.hash.digest(&[&inner]);
        }
        self.x = BigUint::from_bytes_be(&self.hash.digest(&[&self.salt, &inner]));
        Ok(())
    }

    pub fn load_password_verifier(&mut self) -> Result<(), AuthError> {
        if self.x == BigUint::default() {
            return Err(AuthError::BadParameter);
        }
        self.v = self.g.modpow(&self.x, &self.n);
        Ok(())
    }

    pub fn load_verifier_bytes(&mut self, verifier: &[u8]) -> Result<(), AuthError> {
        let v = BigUint::from_bytes_be(verifier);
        if v == BigUint::default() || v >= self.n {
            return Err(AuthError::BadParameter);
        }
        self.v = v;
        Ok(())
    }

    pub fn load_user_secret(&mut self) {
        self.secret_user = random_secret();
    }

    pub fn load_host_secret(&mut self) {
        self.secret_host = random_secret();
    }

    pub fn load_user_nonce(&mut self) -> Result<(), AuthError> {
        if self.secret_user == BigUint::default() {
            return Err(AuthError::BadParameter);
        }
        self.nonce_user = self.g.modpow(&self.secret_user, &self.n);
        Ok(())
    }

    /// Loads the peer's public ephemeral value A, enforcing A mod N != 0.
    pub fn load_user_nonce_bytes(&mut self, nonce: &[u8]) -> Result<(), AuthError> {
        let a = BigUint::from_bytes_be(nonce);
        if (&a % &self.n) == BigUint::default() {
            return Err(AuthError::BadParameter);
        }
        self.nonce_user = a;
        Ok(())
    }

    pub fn load_host_nonce(&mut self) -> Result<(), AuthError> {
        if self.secret_host == BigUint::default() || self.v == BigUint::default() {
            return Err(AuthError::BadParameter);
        }
        let kv = (&self.k * &self.v) % &self.n;
        self.nonce_host = (kv + self.g.modpow(&self.secret_host, &self.n)) % &self.n;
        Ok(())
    }

    /// Loads the peer's public ephemeral value B, enforcing B mod N != 0.
    pub fn load_host_nonce_bytes(&mut self, nonce: &[u8]) -> Result<(), AuthError> {
        let b = BigUint::from_bytes_be(nonce);
        if (&b % &self.n) == BigUint::default() {
            return Err(AuthError::BadParameter);
        }
        self.nonce_host = b;
        Ok(())
    }

    pub fn load_scrambler(&mut self) -> Result<(), AuthError> {
        let digest = self.hash.digest(&[
            &pad_to(&self.nonce_user, self.group.size()),
            &pad_to(&self.nonce_host, self.group.size()),
        ]);
        let u = BigUint::from_bytes_be(&digest);
        if u == BigUint::default() {
            return Err(AuthError::BadParameter);
        }
        self.u = u;
        Ok(())
    }

    /// Computes the premaster secret and derives the session key.
    pub fn load_session_key(&mut self, is_host: bool) -> Result<(), AuthError> {
        let s = if is_host {
            // S = (A * v^u) ^ b
            if self.secret_host == BigUint::default() {
                return Err(AuthError::BadParameter);
            }
            let base = (&self.nonce_user * self.v.modpow(&self.u, &self.n)) % &self.n;
            base.modpow(&self.secret_host, &self.n)
        } else {
            // S = (B - k * g^x) ^ (a + u * x)
            if self.secret_user == BigUint::default() || self.x == BigUint::default() {
                return Err(AuthError::BadParameter);
            }
            let kgx = (&self.k * self.g.modpow(&self.x, &self.n)) % &self.n;
            let base = ((&self.nonce_host + &self.n) - kgx) % &self.n;
            let exponent = &self.secret_user + (&self.u * &self.x);
            base.modpow(&exponent, &self.n)
        };
        self.key = Zeroizing::new(self.hash.digest(&[&pad_to(&s, self.group.size())]));
        Ok(())
    }

    pub fn generate_user_proof(&mut self, identity: &[u8]) -> Result<(), AuthError> {
        if self.key.is_empty() {
            return Err(AuthError::BadParameter);
        }
        let hn = self.hash.digest(&[&self.n.to_bytes_be()]);
        let hg = self.hash.digest(&[&self.g.to_bytes_be()]);
        let hxor: Vec<u8> = hn.iter().zip(hg.iter()).map(|(a, b)| a ^ b).collect();
        let hi = self.hash.digest(&[identity]);
        self.proof_user = self.hash.digest(&[
            &hxor,
            &hi,
            &self.salt,
            &pad_to(&self.nonce_user, self.group.size()),
            &pad_to(&self.nonce_host, self.group.size()),
            &self.key,
        ]);
        Ok(())
    }

    pub fn generate_host_proof(&mut self) -> Result<(), AuthError> {
        if self.key.is_empty() || self.proof_user.is_empty() {
            return Err(AuthError::BadParameter);
        }
        self.proof_host = self.hash.digest(&[
            &pad_to(&self.nonce_user, self.group.size()),
            &self.proof_user,
            &self.key,
        ]);
        Ok(())
    }

    /// Constant-time comparison against the expected user proof.
    pub fn verify_user_proof(&self, proof: &[u8]) -> bool {
        !self.proof_user.is_empty() && self.proof_user.ct_eq(proof).into()
    }

    /// Constant-time comparison against the expected host proof.
    pub fn verify_host_proof(&self, proof: &[u8]) -> bool {
        !self.proof_host.is_empty() && self.proof_host.ct_eq(proof).into()
    }

    /// Random value in [1, N), standing in for B when the identity is
    /// unknown.
    pub fn generate_fake_nonce(&mut self) {
        let mut bytes = vec![0u8; self.group.size()];
        rand::thread_rng().fill_bytes(&mut bytes);
        let mut nonce = BigUint::from_bytes_be(&bytes) % &self.n;
        if nonce == BigUint::default() {
            nonce = BigUint::from(1u32);
        }
        self.nonce_host = nonce;
    }

    /// Deterministic salt for an unknown identity: the same identity always
    /// sees the same salt, so probing cannot distinguish registered from
    /// unregistered names.
    pub fn generate_fake_salt(&mut self, identity: &[u8], seed: &[u8]) {
        let digest = self.hash.digest(&[identity, seed]);
        self.salt = digest[..SALT_LENGTH.min(digest.len())].to_vec();
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    pub fn verifier(&self) -> Vec<u8> {
        pad_to(&self.v, self.group.size())
    }

    pub fn user_nonce(&self) -> Vec<u8> {
        pad_to(&self.nonce_user, self.group.size())
    }

    pub fn host_nonce(&self) -> Vec<u8> {
        pad_to(&self.nonce_host, self.group.size())
    }

    pub fn session_key(&self) -> &[u8] {
        &self.key
    }

    pub fn user_proof(&self) -> &[u8] {
        &self.proof_user
    }

    pub fn host_proof(&self) -> &[u8] {
        &self.proof_host
    }
}

fn random_secret() -> BigUint {
    let mut bytes = [0u8; SECRET_LENGTH];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes[0] |= 1 << 7;
    BigUint::from_bytes_be(&bytes)
}

/// Left-pads a big-endian integer to `size` bytes.
fn pad_to(n: &BigUint, size: usize) -> Vec<u8> {
    let bytes = n.to_bytes_be();
    if bytes.len() >= size {
        return bytes;
    }
    let mut padded = vec![0u8; size - bytes.len()];
    padded.extend_from_slice(&bytes);
    padded
}

/// Registration helper: fresh salt plus the password verifier for it.
pub fn enroll(
    group: SrpGroup,
    hash: SrpHash,
    identity: u64,
    password: &[u8],
    rounds: u32,
) -> Result<IdentityRecord, AuthError> {
    let mut srp = Srp::new(group, hash);
    srp.load_random_salt();
    srp.load_private_key(&identity.to_be_bytes(), password, rounds)?;
    srp.load_password_verifier()?;
    Ok(IdentityRecord {
        salt: srp.salt().to_vec(),
        verifier: srp.verifier(),
    })
}

/// Host-role handshake driver.
#[derive(Debug)]
pub struct HostAuth {
    srp: Srp,
    identity: u64,
    faked: bool,
    verified: bool,
}

impl HostAuth {
    /// Step one: consume (identity, client nonce A) and prepare the
    /// challenge. An unknown identity takes the fake-salt path; the
    /// returned object behaves identically either way.
    pub fn challenge(
        group: SrpGroup,
        hash: SrpHash,
        identity: u64,
        record: Option<&IdentityRecord>,
        client_nonce: &[u8],
        seed: &[u8],
    ) -> Result<Self, AuthError> {
        let mut srp = Srp::new(group, hash);
        srp.load_user_nonce_bytes(client_nonce)?;
        match record {
            Some(record) => {
                srp.load_salt(&record.salt)?;
                srp.load_verifier_bytes(&record.verifier)?;
                srp.load_host_secret();
                srp.load_host_nonce()?;
                srp.load_scrambler()?;
                srp.load_session_key(true)?;
                srp.generate_user_proof(&identity.to_be_bytes())?;
                srp.generate_host_proof()?;
                Ok(Self {
                    srp,
                    identity,
                    faked: false,
                    verified: false,
                })
            }
            None => {
                srp.generate_fake_salt(&identity.to_be_bytes(), seed);
                srp.generate_fake_nonce();
                // Garbage expectation of the right length keeps the final
                // comparison on the same code path.
                srp.proof_user = srp.hash.digest(&[srp.salt(), client_nonce, seed]);
                Ok(Self {
                    srp,
                    identity,
                    faked: true,
                    verified: false,
                })
            }
        }
    }

    pub fn identity(&self) -> u64 {
        self.identity
    }

    pub fn salt(&self) -> &[u8] {
        self.srp.salt()
    }

    /// Host public nonce B, or the fake nonce on the hiding path. Always
    /// group-size bytes.
    pub fn nonce(&self) -> Vec<u8> {
        self.srp.host_nonce()
    }

    /// Step two: verify the client's proof. On success returns the host
    /// proof for mutual authentication.
    pub fn verify(&mut self, proof: &[u8]) -> Result<&[u8], AuthError> {
        let matched = self.srp.verify_user_proof(proof);
        if self.faked || !matched {
            return Err(AuthError::Rejected);
        }
        self.verified = true;
        Ok(self.srp.host_proof())
    }

    /// Session key K, available only after a verified exchange.
    pub fn session_key(&self) -> Option<&[u8]> {
        self.verified.then(|| self.srp.session_key())
    }
}

/// User-role handshake driver, used by the test tooling and by hubs
/// authenticating outbound.
pub struct UserAuth {
    srp: Srp,
    identity: u64,
    password: Zeroizing<Vec<u8>>,
    rounds: u32,
}

impl UserAuth {
    pub fn start(
        group: SrpGroup,
        hash: SrpHash,
        identity: u64,
        password: &[u8],
        rounds: u32,
    ) -> Result<Self, AuthError> {
        if rounds == 0 {
            return Err(AuthError::BadParameter);
        }
        let mut srp = Srp::new(group, hash);
        srp.load_user_secret();
        srp.load_user_nonce()?;
        Ok(Self {
            srp,
            identity,
            password: Zeroizing::new(password.to_vec()),
            rounds,
        })
    }

    /// Client public nonce A, group-size bytes.
    pub fn nonce(&self) -> Vec<u8> {
        self.srp.user_nonce()
    }

    /// Consumes the host's challenge (salt, B) and produces the client
    /// proof M.
    pub fn respond(&mut self, salt: &[u8], host_nonce: &[u8]) -> Result<Vec<u8>, AuthError> {
        self.srp.load_salt(salt)?;
        self.srp.load_host_nonce_bytes(host_nonce)?;
        self.srp
            .load_private_key(&self.identity.to_be_bytes(), &self.password, self.rounds)?;
        self.srp.load_scrambler()?;
        self.srp.load_session_key(false)?;
        self.srp.generate_user_proof(&self.identity.to_be_bytes())?;
        self.srp.generate_host_proof()?;
        Ok(self.srp.user_proof().to_vec())
    }

    /// Verifies the host's proof; on success yields the session key.
    pub fn confirm(&mut self, host_proof: &[u8]) -> Result<Zeroizing<Vec<u8>>, AuthError> {
        if self.srp.verify_host_proof(host_proof) {
            Ok(Zeroizing::new(self.srp.session_key().to_vec()))
        } else {
            Err(AuthError::Rejected)
        }
    }
}

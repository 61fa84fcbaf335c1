//! Password derivation: shared secret -> (key, meeting1, meeting2).
//!
//! Strong secrets (and tests) expand the canonical secret bytes with HKDF-SHA256. Everything else goes through scrypt, whose cost is the only thing standing between a short passphrase and an offline guesser. scrypt at protocol cost needs ~256 MiB, so it can be moved into a worker process; both paths must produce identical bytes.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use hkdf::Hkdf;
use sha2::Sha256;
use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::errors::PandaError;
use crate::secret::SharedSecret;

/// STRONG_SECRET_INFO is the HKDF info label for the no-stretch path
pub const STRONG_SECRET_INFO: &[u8] = b"PANDA strong secret expansion";
/// STRETCH_OUTPUT is key || meeting1 || meeting2
pub const STRETCH_OUTPUT: usize = 32 * 3;
/// MAX_WORKER_INPUT bounds what the worker will read from its stdin
const MAX_WORKER_INPUT: u32 = 1 << 20;
// scrypt::Params only uses its length for PHC strings; scrypt() takes the output length from the buffer
const PARAMS_LEN: usize = 32;

/// ScryptCost holds the scrypt work factors. `PROTOCOL` is fixed by the protocol version; peers with different costs derive different keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScryptCost {
    pub log_n: u8,
    pub r: u32,
    pub p: u32,
}

impl ScryptCost {
    pub const PROTOCOL: ScryptCost = ScryptCost { log_n: 17, r: 16, p: 4 };

    fn params(&self) -> Result<scrypt::Params, PandaError> {
        scrypt::Params::new(self.log_n, self.r, self.p, PARAMS_LEN)
            .map_err(|_| PandaError::Derivation(format!("invalid scrypt cost {:?}", self)))
    }
}

impl Default for ScryptCost {
    fn default() -> Self {
        Self::PROTOCOL
    }
}

/// DerivedKeys is the output of password derivation. Wiped on drop.
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKeys {
    pub key: [u8; 32],
    pub meeting1: [u8; 32],
    pub meeting2: [u8; 32],
}

impl DerivedKeys {
    fn from_output(output: &[u8; STRETCH_OUTPUT]) -> Self {
        let mut keys = DerivedKeys::default();
        keys.key.copy_from_slice(&output[..32]);
        keys.meeting1.copy_from_slice(&output[32..64]);
        keys.meeting2.copy_from_slice(&output[64..]);
        keys
    }
}

/// StretchBackend runs the memory-hard stretch over the canonical secret bytes.
pub trait StretchBackend: Send + Sync {
    fn stretch(&self, input: &[u8]) -> Result<Zeroizing<[u8; STRETCH_OUTPUT]>, PandaError>;
}

fn scrypt_stretch(input: &[u8], cost: &ScryptCost) -> Result<Zeroizing<[u8; STRETCH_OUTPUT]>, PandaError> {
    let params = cost.params()?;
    let mut output = Zeroizing::new([0u8; STRETCH_OUTPUT]);
    scrypt::scrypt(input, &[], &params, &mut output[..])
        .map_err(|_| PandaError::Derivation("scrypt output length rejected".into()))?;
    Ok(output)
}

/// InProcessScrypt stretches on the calling thread.
#[derive(Clone, Debug, Default)]
pub struct InProcessScrypt {
    pub cost: ScryptCost,
}

impl InProcessScrypt {
    pub fn new(cost: ScryptCost) -> Self {
        Self { cost }
    }
}

impl StretchBackend for InProcessScrypt {
    fn stretch(&self, input: &[u8]) -> Result<Zeroizing<[u8; STRETCH_OUTPUT]>, PandaError> {
        scrypt_stretch(input, &self.cost)
    }
}

/// SubprocessScrypt hands the stretch to a worker process so the large scrypt allocation never touches the caller's heap.
///
/// The worker reads `log_n (u8) || r (u32 LE) || p (u32 LE) || len (u32 LE) || input` from stdin and writes exactly 96 bytes to stdout. `run_stretch_worker` is the other end.
#[derive(Clone, Debug)]
pub struct SubprocessScrypt {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cost: ScryptCost,
}

impl SubprocessScrypt {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, cost: ScryptCost) -> Self {
        Self { program: program.into(), args, cost }
    }

    /// current_exe re-executes this binary with its hidden `stretch-worker` subcommand
    pub fn current_exe(cost: ScryptCost) -> Result<Self, PandaError> {
        Ok(Self::new(std::env::current_exe()?, vec!["stretch-worker".to_string()], cost))
    }
}

impl StretchBackend for SubprocessScrypt {
    fn stretch(&self, input: &[u8]) -> Result<Zeroizing<[u8; STRETCH_OUTPUT]>, PandaError> {
        let len = u32::try_from(input.len())
            .ok()
            .filter(|&l| l <= MAX_WORKER_INPUT)
            .ok_or_else(|| PandaError::Derivation("secret too large for stretch worker".into()))?;

        let mut request = Zeroizing::new(Vec::with_capacity(13 + input.len()));
        request.push(self.cost.log_n);
        request.extend_from_slice(&self.cost.r.to_le_bytes());
        request.extend_from_slice(&self.cost.p.to_le_bytes());
        request.extend_from_slice(&len.to_le_bytes());
        request.extend_from_slice(input);

        debug!(program = %self.program.display(), "starting stretch worker");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&request)?;
        }
        let output = child.wait_with_output()?;
        let stdout = Zeroizing::new(output.stdout);
        if !output.status.success() {
            return Err(PandaError::Derivation(format!("stretch worker exited with {}", output.status)));
        }
        if stdout.len() != STRETCH_OUTPUT {
            return Err(PandaError::Derivation(format!(
                "stretch worker returned wrong number of bytes: {}",
                stdout.len()
            )));
        }
        let mut result = Zeroizing::new([0u8; STRETCH_OUTPUT]);
        result.copy_from_slice(&stdout);
        Ok(result)
    }
}

/// run_stretch_worker is the worker side of `SubprocessScrypt`
pub fn run_stretch_worker<R: Read, W: Write>(mut input: R, mut output: W) -> Result<(), PandaError> {
    let mut header = [0u8; 13];
    input.read_exact(&mut header)?;
    let word = |at: usize| u32::from_le_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]]);
    let cost = ScryptCost { log_n: header[0], r: word(1), p: word(5) };
    let len = word(9);
    if len > MAX_WORKER_INPUT {
        return Err(PandaError::Derivation(format!("stretch worker input of {} bytes refused", len)));
    }
    let mut secret = Zeroizing::new(vec![0u8; len as usize]);
    input.read_exact(&mut secret)?;
    let stretched = scrypt_stretch(&secret, &cost)?;
    output.write_all(&stretched[..])?;
    output.flush()?;
    Ok(())
}

/// StretchPolicy picks where the expensive stretch runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StretchPolicy {
    /// subprocess on 32-bit Linux, where the allocation upsets the process, in-process elsewhere
    #[default]
    Auto,
    InProcess,
    Subprocess,
}

/// backend_for builds the backend a policy asks for, at protocol cost
pub fn backend_for(policy: StretchPolicy) -> Result<Box<dyn StretchBackend>, PandaError> {
    let constrained = cfg!(all(target_os = "linux", target_pointer_width = "32"));
    match policy {
        StretchPolicy::Subprocess => Ok(Box::new(SubprocessScrypt::current_exe(ScryptCost::PROTOCOL)?)),
        StretchPolicy::Auto if constrained => Ok(Box::new(SubprocessScrypt::current_exe(ScryptCost::PROTOCOL)?)),
        _ => Ok(Box::new(InProcessScrypt::new(ScryptCost::PROTOCOL))),
    }
}

/// derive_password turns the shared secret into the encryption key and both rendezvous tags
pub fn derive_password(secret: &SharedSecret, fast: bool, backend: &dyn StretchBackend) -> Result<DerivedKeys, PandaError> {
    let canonical = Zeroizing::new(secret.canonical_bytes()?);
    if fast || secret.is_strong_random() {
        debug!("expanding strong secret");
        let hk = Hkdf::<Sha256>::new(None, &canonical);
        let mut output = Zeroizing::new([0u8; STRETCH_OUTPUT]);
        hk.expand(STRONG_SECRET_INFO, &mut output[..])
            .map_err(|_| PandaError::Derivation("hkdf expansion failed".into()))?;
        return Ok(DerivedKeys::from_output(&output));
    }
    info!("stretching shared secret, this takes a while");
    let output = backend.stretch(&canonical)?;
    Ok(DerivedKeys::from_output(&output))
}

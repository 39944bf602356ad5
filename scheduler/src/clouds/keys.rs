//! SSH keypair for cloud-created nodes.
//!
//! The first `yakey*` file under `keys_dir` is adopted; absent that, a fresh
//! RSA-2048 key is generated and written with mode 0600 for reuse on later
//! runs. Access is guarded by the manager's key lock so concurrent providers
//! don't race the generation.

use base64::engine::general_purpose::STANDARD as B64_STANDARD;
use base64::Engine as _;
use openssl::rsa::Rsa;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const KEY_PREFIX: &str = "yakey";

#[derive(Debug, Clone)]
pub struct SshKey {
    /// Path of the private key file (passed to SSH connections).
    pub path: PathBuf,
    /// File name, used as the key name at cloud providers.
    pub name: String,
    /// Public key in OpenSSH `ssh-rsa AAAA… name` form.
    pub public_openssh: String,
}

/// Load the first usable `yakey*` file or generate a new keypair.
pub fn load_or_generate(keys_dir: &Path) -> Result<SshKey, String> {
    std::fs::create_dir_all(keys_dir)
        .map_err(|e| format!("cannot create keys dir {}: {}", keys_dir.display(), e))?;

    let mut candidates: Vec<PathBuf> = std::fs::read_dir(keys_dir)
        .map_err(|e| format!("cannot read keys dir {}: {}", keys_dir.display(), e))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .map(|n| n.to_string_lossy().starts_with(KEY_PREFIX))
                    .unwrap_or(false)
        })
        .collect();
    candidates.sort();

    for path in candidates {
        match load_key(&path) {
            Ok(key) => {
                info!("Loaded SSH key {}", path.display());
                return Ok(key);
            }
            Err(e) => warn!("Skipping unreadable key {}: {}", path.display(), e),
        }
    }

    generate_key(keys_dir)
}

fn load_key(path: &Path) -> Result<SshKey, String> {
    let pem = std::fs::read(path).map_err(|e| e.to_string())?;
    let rsa = Rsa::private_key_from_pem(&pem).map_err(|e| e.to_string())?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| KEY_PREFIX.to_string());
    Ok(SshKey {
        path: path.to_path_buf(),
        public_openssh: public_openssh(&rsa, &name),
        name,
    })
}

fn generate_key(keys_dir: &Path) -> Result<SshKey, String> {
    let rsa = Rsa::generate(2048).map_err(|e| e.to_string())?;
    let pem = rsa.private_key_to_pem().map_err(|e| e.to_string())?;

    let name = shared::utils::rnd_name(KEY_PREFIX);
    let path = keys_dir.join(&name);
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(&path)
        .map_err(|e| format!("cannot write key {}: {}", path.display(), e))?;
    file.write_all(&pem).map_err(|e| e.to_string())?;

    info!("Written SSH key {}", path.display());
    Ok(SshKey {
        public_openssh: public_openssh(&rsa, &name),
        path,
        name,
    })
}

/// Render the OpenSSH public key line: base64 of the SSH wire encoding
/// (`string "ssh-rsa", mpint e, mpint n`).
fn public_openssh<T: openssl::pkey::HasPublic>(rsa: &Rsa<T>, comment: &str) -> String {
    let mut blob = Vec::new();
    write_ssh_string(&mut blob, b"ssh-rsa");
    write_ssh_mpint(&mut blob, &rsa.e().to_vec());
    write_ssh_mpint(&mut blob, &rsa.n().to_vec());
    format!("ssh-rsa {} {}", B64_STANDARD.encode(&blob), comment)
}

fn write_ssh_string(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(data);
}

fn write_ssh_mpint(out: &mut Vec<u8>, data: &[u8]) {
    // A leading zero byte keeps the big-endian value positive.
    if data.first().map(|b| b & 0x80 != 0).unwrap_or(false) {
        out.extend_from_slice(&((data.len() + 1) as u32).to_be_bytes());
        out.push(0);
    } else {
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    }
    out.extend_from_slice(data);
}

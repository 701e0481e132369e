//! Bitmap IP address management.
//!
//! Each subnet gets a string of `'0'`/`'1'` characters, one per usable host
//! address, keyed by its canonical CIDR in a single JSON file. Every
//! allocation or release is a read-modify-write of that file, serialized
//! by an in-process mutex and an exclusive `flock(2)` so that concurrent
//! `vessel` processes do not hand out the same address.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use ipnetwork::Ipv4Network;
use nix::fcntl::{Flock, FlockArg};
use vessel_common::error::{Result, VesselError};

const FREE: u8 = b'0';
const TAKEN: u8 = b'1';

/// Shortest prefix accepted; larger ranges would need a multi-megabyte bitmap.
pub const MIN_PREFIX: u8 = 8;

/// Allocation bitmaps keyed by canonical CIDR.
type Bitmaps = BTreeMap<String, String>;

/// File-backed IPv4 allocator.
#[derive(Debug)]
pub struct Ipam {
    path: PathBuf,
    lock: Mutex<()>,
}

impl Ipam {
    /// Creates an allocator persisting to `path`. Nothing is touched until
    /// the first allocation.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Returns the state file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Allocates the lowest free host address in `subnet`.
    ///
    /// `subnet` may carry any address inside the range; only its network
    /// and prefix are used.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::Exhausted`] when every host address is taken,
    /// [`VesselError::Config`] for a prefix shorter than [`MIN_PREFIX`], or
    /// an error if the state file cannot be read or written.
    pub fn allocate(&self, subnet: &Ipv4Network) -> Result<Ipv4Addr> {
        if subnet.prefix() < MIN_PREFIX {
            return Err(VesselError::Config {
                message: format!("subnet {subnet} is wider than /{MIN_PREFIX}"),
            });
        }
        let (first, size) = host_range(subnet);
        let key = canonical(subnet);

        let ip = self.update(|bitmaps| {
            let bitmap = bitmaps
                .entry(key.clone())
                .or_insert_with(|| char::from(FREE).to_string().repeat(size as usize));
            check_len(&key, bitmap, size)?;

            let offset = bitmap
                .bytes()
                .position(|b| b == FREE)
                .ok_or_else(|| VesselError::Exhausted {
                    subnet: key.clone(),
                })?;
            bitmap.replace_range(offset..=offset, "1");
            let offset = u32::try_from(offset).unwrap_or(u32::MAX);
            Ok(Ipv4Addr::from(u32::from(first) + offset))
        })?;

        tracing::debug!(subnet = %key, %ip, "address allocated");
        Ok(ip)
    }

    /// Returns `ip` to the pool of `subnet`.
    ///
    /// Releasing an address that is not allocated is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::Config`] if `ip` is not a host address of
    /// `subnet`, or an error if the state file cannot be read or written.
    pub fn release(&self, subnet: &Ipv4Network, ip: Ipv4Addr) -> Result<()> {
        let (first, size) = host_range(subnet);
        let key = canonical(subnet);
        let offset = u32::from(ip)
            .checked_sub(u32::from(first))
            .filter(|offset| u64::from(*offset) < size)
            .ok_or_else(|| VesselError::Config {
                message: format!("{ip} is not a host address of {key}"),
            })? as usize;

        self.update(|bitmaps| {
            if let Some(bitmap) = bitmaps.get_mut(&key) {
                check_len(&key, bitmap, size)?;
                if bitmap.as_bytes()[offset] == TAKEN {
                    bitmap.replace_range(offset..=offset, "0");
                }
            }
            Ok(())
        })?;

        tracing::debug!(subnet = %key, %ip, "address released");
        Ok(())
    }

    /// Runs `f` on the bitmaps under both locks and writes the result back.
    fn update<T>(&self, f: impl FnOnce(&mut Bitmaps) -> Result<T>) -> Result<T> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| VesselError::io(dir, e))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| VesselError::io(&self.path, e))?;
        let mut file = Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, e)| {
            VesselError::Syscall {
                message: format!("flock {}: {e}", self.path.display()),
            }
        })?;

        let mut bitmaps = self.read(&mut file)?;
        let value = f(&mut bitmaps)?;
        self.write(&mut file, &bitmaps)?;
        Ok(value)
    }

    fn read(&self, file: &mut File) -> Result<Bitmaps> {
        let mut raw = String::new();
        file.read_to_string(&mut raw)
            .map_err(|e| VesselError::io(&self.path, e))?;
        if raw.trim().is_empty() {
            return Ok(Bitmaps::new());
        }
        serde_json::from_str(&raw).map_err(|e| VesselError::Malformed {
            what: "ipam state",
            message: format!("{}: {e}", self.path.display()),
        })
    }

    fn write(&self, file: &mut File, bitmaps: &Bitmaps) -> Result<()> {
        let raw = serde_json::to_vec(bitmaps)?;
        file.set_len(0)
            .and_then(|()| file.seek(SeekFrom::Start(0)))
            .and_then(|_| file.write_all(&raw))
            .and_then(|()| file.sync_data())
            .map_err(|e| VesselError::io(&self.path, e))
    }
}

/// Canonical CIDR string of the network containing `subnet`.
#[must_use]
pub fn canonical(subnet: &Ipv4Network) -> String {
    format!("{}/{}", subnet.network(), subnet.prefix())
}

/// First usable host address and number of usable host addresses.
///
/// The network and broadcast addresses are excluded for prefixes shorter
/// than /31, where they exist.
#[must_use]
pub fn host_range(subnet: &Ipv4Network) -> (Ipv4Addr, u64) {
    let network = u32::from(subnet.network());
    let total = 1u64 << (32 - u32::from(subnet.prefix()));
    if subnet.prefix() < 31 {
        (Ipv4Addr::from(network + 1), total - 2)
    } else {
        (Ipv4Addr::from(network), total)
    }
}

fn check_len(key: &str, bitmap: &str, size: u64) -> Result<()> {
    if bitmap.len() as u64 == size && bitmap.bytes().all(|b| b == FREE || b == TAKEN) {
        Ok(())
    } else {
        Err(VesselError::Malformed {
            what: "ipam bitmap",
            message: format!("{key} does not hold {size} allocation flags"),
        })
    }
}

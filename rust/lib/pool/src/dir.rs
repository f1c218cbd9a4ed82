use std::fs::{self, File, OpenOptions, ReadDir};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use tracing::{debug, trace};

use crate::error::PoolError;
use crate::traits::{Cluster, IoContext, ObjectIter, ObjectStat};

/// DirCluster is a Cluster backed by a local directory.
///
/// Each pool is a sub-directory of `root`; each object is one file under its
/// pool directory, named by the URL-safe base64 of the object name:
///
/// ```text
/// root/
/// ├── data/                 pool "data"
/// │   ├── L2EvYg            object "/a/b"
/// │   ├── L2U               object "/e"
/// │   └── L2tr...a2.d/      first 200 chars of a long name
/// │       └── a2tr...       rest of that name
/// └── scratch/              pool "scratch"
/// ```
///
/// Encoded names longer than [`NAME_SEGMENT_LEN`] are split into segment
/// directories (suffixed `.d`, which is outside the base64 alphabet) so no
/// path component exceeds file system name limits. Listing walks the segment
/// directories and rebuilds the full name.
pub struct DirCluster {
    root: PathBuf,
    shut_down: AtomicBool,
}

impl DirCluster {
    /// Connect to the cluster rooted at `root`. The directory must exist.
    pub fn open(root: &Path) -> Result<Self, PoolError> {
        if !root.is_dir() {
            return Err(PoolError::Connect(format!(
                "cluster root {:?} is not a directory",
                root
            )));
        }
        debug!("DirCluster: connected to {:?}", root);
        Ok(Self {
            root: root.to_path_buf(),
            shut_down: AtomicBool::new(false),
        })
    }

    fn pool_dir(&self, pool: &str) -> Result<PathBuf, PoolError> {
        if pool.is_empty()
            || pool == "."
            || pool == ".."
            || pool.contains('/')
            || pool.contains('\\')
        {
            return Err(PoolError::PoolNotFound(format!("invalid pool name: {:?}", pool)));
        }
        Ok(self.root.join(pool))
    }
}

impl Cluster for DirCluster {
    fn open_context(&self, pool: &str) -> Result<Box<dyn IoContext>, PoolError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(PoolError::Shutdown);
        }
        let dir = self.pool_dir(pool)?;
        if !dir.is_dir() {
            return Err(PoolError::PoolNotFound(pool.to_string()));
        }
        trace!(pool, "dir io context opened");
        Ok(Box::new(DirContext {
            pool: pool.to_string(),
            dir,
        }))
    }

    fn create_pool(&self, pool: &str) -> Result<(), PoolError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(PoolError::Shutdown);
        }
        let dir = self.pool_dir(pool)?;
        fs::create_dir_all(&dir).map_err(|e| PoolError::Io(e.to_string()))
    }

    fn list_pools(&self) -> Result<Vec<String>, PoolError> {
        let mut pools = Vec::new();
        let entries = fs::read_dir(&self.root).map_err(|e| PoolError::Io(e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| PoolError::Io(e.to_string()))?;
            if entry.path().is_dir() {
                pools.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        pools.sort();
        Ok(pools)
    }

    fn shutdown(&self) {
        if !self.shut_down.swap(true, Ordering::AcqRel) {
            debug!("DirCluster: shut down {:?}", self.root);
        }
    }
}

struct DirContext {
    pool: String,
    dir: PathBuf,
}

impl DirContext {
    fn object_path(&self, oid: &str) -> Result<PathBuf, PoolError> {
        if oid.is_empty() {
            return Err(PoolError::Io("empty object name".to_string()));
        }
        Ok(object_path(&self.dir, oid))
    }

    /// Like `object_path`, creating missing segment directories.
    fn writable_path(&self, oid: &str) -> Result<PathBuf, PoolError> {
        let path = self.object_path(oid)?;
        if let Some(parent) = path.parent() {
            if parent != self.dir {
                fs::create_dir_all(parent).map_err(|e| map_io(e, oid))?;
            }
        }
        Ok(path)
    }

    /// Remove segment directories left empty by a removal.
    fn prune_segments(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.dir || fs::remove_dir(dir).is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

impl IoContext for DirContext {
    fn pool(&self) -> &str {
        &self.pool
    }

    fn write(&self, oid: &str, data: &[u8], offset: u64) -> Result<(), PoolError> {
        let path = self.writable_path(oid)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| map_io(e, oid))?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| map_io(e, oid))?;
        file.write_all(data).map_err(|e| map_io(e, oid))?;
        Ok(())
    }

    fn write_full(&self, oid: &str, data: &[u8]) -> Result<(), PoolError> {
        let path = self.writable_path(oid)?;
        fs::write(&path, data).map_err(|e| map_io(e, oid))
    }

    fn read(&self, oid: &str, buf: &mut [u8], offset: u64) -> Result<usize, PoolError> {
        let path = self.object_path(oid)?;
        let mut file = File::open(&path).map_err(|e| map_io(e, oid))?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| map_io(e, oid))?;

        // A single read may come back short before EOF; keep going until the
        // buffer is full or the file ends so a short count always means EOF.
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(map_io(e, oid)),
            }
        }
        Ok(filled)
    }

    fn remove(&self, oid: &str) -> Result<(), PoolError> {
        let path = self.object_path(oid)?;
        fs::remove_file(&path).map_err(|e| map_io(e, oid))?;
        self.prune_segments(&path);
        Ok(())
    }

    fn stat(&self, oid: &str) -> Result<ObjectStat, PoolError> {
        let path = self.object_path(oid)?;
        let meta = fs::metadata(&path).map_err(|e| map_io(e, oid))?;
        if !meta.is_file() {
            return Err(PoolError::NotFound(oid.to_string()));
        }
        Ok(ObjectStat { size: meta.len() })
    }

    fn objects(&self) -> Result<ObjectIter, PoolError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| PoolError::Io(e.to_string()))?;
        Ok(Box::new(ObjectWalk {
            stack: vec![(String::new(), entries)],
        }))
    }
}

/// Lazy depth-first walk over a pool directory. Each stack frame holds the
/// encoded name prefix contributed by the segment directories above it.
struct ObjectWalk {
    stack: Vec<(String, ReadDir)>,
}

impl Iterator for ObjectWalk {
    type Item = Result<String, PoolError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (prefix, entries) = self.stack.last_mut()?;
            let entry = match entries.next() {
                None => {
                    self.stack.pop();
                    continue;
                }
                Some(Err(e)) => return Some(Err(PoolError::Io(e.to_string()))),
                Some(Ok(entry)) => entry,
            };
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            let is_dir = match entry.file_type() {
                Ok(ft) => ft.is_dir(),
                Err(e) => return Some(Err(PoolError::Io(e.to_string()))),
            };

            if is_dir {
                let segment = match file_name.strip_suffix(SEGMENT_DIR_SUFFIX) {
                    Some(segment) if segment.len() == NAME_SEGMENT_LEN => segment,
                    _ => {
                        trace!("DirCluster: skipping foreign directory {:?}", file_name);
                        continue;
                    }
                };
                let encoded = format!("{}{}", prefix, segment);
                match fs::read_dir(entry.path()) {
                    Ok(children) => self.stack.push((encoded, children)),
                    Err(e) => return Some(Err(PoolError::Io(e.to_string()))),
                }
                continue;
            }

            match decode_name(&format!("{}{}", prefix, file_name)) {
                Some(name) => return Some(Ok(name)),
                None => trace!("DirCluster: skipping foreign file {:?}", file_name),
            }
        }
    }
}

impl Drop for DirContext {
    fn drop(&mut self) {
        trace!(pool = %self.pool, "dir io context released");
    }
}

/// Longest encoded name stored as a single path component.
pub const NAME_SEGMENT_LEN: usize = 200;

const SEGMENT_DIR_SUFFIX: &str = ".d";

fn encode_name(oid: &str) -> String {
    URL_SAFE_NO_PAD.encode(oid.as_bytes())
}

/// Path of an object's file: full segments become `.d` directories and the
/// remainder (1..=NAME_SEGMENT_LEN chars) is the file name.
fn object_path(pool_dir: &Path, oid: &str) -> PathBuf {
    let encoded = encode_name(oid);
    let mut path = pool_dir.to_path_buf();
    let mut rest = encoded.as_str();
    while rest.len() > NAME_SEGMENT_LEN {
        let (segment, tail) = rest.split_at(NAME_SEGMENT_LEN);
        path.push(format!("{}{}", segment, SEGMENT_DIR_SUFFIX));
        rest = tail;
    }
    path.push(rest);
    path
}

fn decode_name(file_name: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(file_name.as_bytes()).ok()?;
    String::from_utf8(bytes).ok()
}

fn map_io(e: io::Error, oid: &str) -> PoolError {
    if e.kind() == io::ErrorKind::NotFound {
        PoolError::NotFound(oid.to_string())
    } else {
        PoolError::Io(format!("{}: {}", oid, e))
    }
}

use std::env::current_exe;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::str;
use std::sync::Arc;
use std::sync::Mutex;

use directories_next::ProjectDirs;
use fd_lock::{RwLock, RwLockWriteGuard};
use log::{debug, info, warn};
use serde_json;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::config::types::DeviceProfile;
use crate::error::ConfigError;

// a profile file in the same directory as the executable takes precedence, so
// the tool can run self contained from a usb stick
fn get_portable_config_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(mut path) => {
            // F:\blelink.exe => F:\blelink.json
            if !path.set_extension("json") {
                warn!("Current exe has no filename: {}", path.to_string_lossy());
                return None;
            }

            Some(path)
        },
        Err(err) => {
            warn!("Failed to get current exe path: {:?}", err);
            None
        },
    }
}

// blelink.json in an os dependent standard directory, such as %AppData% on
// windows
fn get_local_config_path() -> Option<PathBuf> {
    ProjectDirs::from("dev", "blelink", "blelink").map(|dirs| {
        dirs.config_dir().join("blelink.json")
    })
}

fn get_config_path() -> Result<PathBuf, ConfigError> {
    let portable = get_portable_config_path();
    if let Some(path) = portable {
        let attr = std::fs::metadata(&path);
        match attr {
            Ok(attr) => {
                if attr.is_file() {
                    return Ok(path);
                }
            },
            Err(err) => {
                debug!("Could not read metadata of: {}; Using local path instead. ({:?})", path.to_string_lossy(), err);
            },
        }
    }

    match get_local_config_path() {
        None => Err(ConfigError::NoConfigPath),
        Some(path) => Ok(path),
    }
}

pub struct ConfigIOLocker {
    rw_lock: RwLock<std::fs::File>,
}

impl ConfigIOLocker {
    pub fn lock(&mut self) -> Result<RwLockWriteGuard<std::fs::File>, ConfigError> {
        match self.rw_lock.try_write() {
            Ok(guard) => Ok(guard),
            Err(source) => {
                return Err(ConfigError::CanNotLock { source });
            },
        }
    }
}

struct ConfigIOInner {
    file: std::fs::File,
}

#[derive(Clone)]
pub struct ConfigIO {
    inner: Arc<Mutex<ConfigIOInner>>,
}

impl ConfigIO {
    pub fn new_sync() -> Result<Self, ConfigError> {
        let path = get_config_path()?;
        info!("Using profile file {}", path.to_string_lossy());

        let directory = path.parent().expect("Failed to determine parent path of profile path");
        std::fs::create_dir_all(directory)?;

        // the profile file doubles as an exclusive lock so that only one
        // instance of this tool works the adapter at a time
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .truncate(false)
            .append(false)
            .create(true)
            .open(path)?;

        let inner = ConfigIOInner {
            file,
        };
        Ok(ConfigIO { inner: Arc::new(Mutex::new(inner)) })
    }

    pub fn locker(&mut self) -> Result<ConfigIOLocker, ConfigError> {
        let inner = self.inner.lock().expect("Failed to lock ConfigIO inner");

        Ok(ConfigIOLocker {
            rw_lock: RwLock::new(inner.file.try_clone()?),
        })
    }

    // The File returned from here should never be closed!
    fn get_file(&self) -> Result<File, ConfigError> {
        let inner = self.inner.lock().expect("Failed to lock ConfigIO inner");
        let file = inner.file.try_clone()?; // std File
        Ok(File::from_std(file)) // tokio File
    }

    pub async fn read(&self) -> Result<DeviceProfile, ConfigError> {
        let mut file = self.get_file()?;
        debug!("Reading profile file");

        let mut content = vec![];
        file.read_to_end(&mut content).await?;

        if content.is_empty() {
            // nothing persisted yet; run against the built in defaults
            return Ok(DeviceProfile::default());
        }

        let content = str::from_utf8(&content)?;

        let profile: DeviceProfile = serde_json::from_str(content)?;
        Ok(profile)
    }

    pub async fn save(&self, profile: DeviceProfile) -> Result<(), ConfigError> {
        let mut file = self.get_file()?;
        debug!("Saving profile file");

        let content = serde_json::to_string_pretty(&profile)?;
        file.rewind().await?;
        file.set_len(0).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

//! Background load and save jobs on the blocking pool.
//!
//! At most one job may touch a given path at a time. A second request for a busy path fails
//! with [`PcxrError::PathBusy`] instead of queueing. Paths are compared by their canonical
//! parent directory, so `dir/./a.pcxr` and `dir/a.pcxr` are the same job target.

use crate::error::PcxrError;
use crate::reader::read_cloud;
use crate::structures::{Header, PointCloud};
use crate::writer::PcxrWriter;
use log::debug;
use foldhash::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::UnboundedSender;

/// Completion notifications published to an optional listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudEvent {
    Loaded { path: PathBuf, points: u32 },
    Saved { path: PathBuf, points: u32 },
}

#[derive(Debug, Clone, Default)]
pub struct IoWorkers {
    busy: Arc<Mutex<HashSet<PathBuf>>>,
    events: Option<UnboundedSender<CloudEvent>>,
}

/// Keeps a path marked busy until dropped.
struct PathClaim {
    busy: Arc<Mutex<HashSet<PathBuf>>>,
    path: PathBuf,
}

impl Drop for PathClaim {
    fn drop(&mut self) {
        lock(&self.busy).remove(&self.path);
    }
}

/// Busy-set key: canonical parent joined with the file name. The file itself may not
/// exist yet, so only the parent is resolved. Falls back to the path as given.
fn busy_key(path: &Path) -> PathBuf {
    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return path.to_path_buf();
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    match parent.canonicalize() {
        Ok(dir) => dir.join(name),
        Err(_) => path.to_path_buf(),
    }
}

fn lock(busy: &Mutex<HashSet<PathBuf>>) -> MutexGuard<'_, HashSet<PathBuf>> {
    busy.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl IoWorkers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: UnboundedSender<CloudEvent>) -> Self {
        IoWorkers {
            busy: Arc::default(),
            events: Some(events),
        }
    }

    pub fn is_busy<P: AsRef<Path>>(&self, path: P) -> bool {
        lock(&self.busy).contains(&busy_key(path.as_ref()))
    }

    fn claim(&self, path: &Path) -> Result<PathClaim, PcxrError> {
        let key = busy_key(path);
        if !lock(&self.busy).insert(key.clone()) {
            return Err(PcxrError::PathBusy(path.to_path_buf()));
        }
        Ok(PathClaim {
            busy: Arc::clone(&self.busy),
            path: key,
        })
    }

    fn publish(&self, event: CloudEvent) {
        if let Some(events) = &self.events {
            if events.send(event).is_err() {
                debug!("Cloud event listener dropped");
            }
        }
    }

    /// Runs `job` on the blocking pool while `path` is claimed. The claim moves into the job
    /// so the path stays busy until the job itself finishes.
    async fn run<T, F>(&self, path: &Path, job: F) -> Result<T, PcxrError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, PcxrError> + Send + 'static,
    {
        let claim = self.claim(path)?;
        tokio::task::spawn_blocking(move || {
            let _claim = claim;
            job()
        })
        .await
        .map_err(|e| PcxrError::Worker(e.to_string()))?
    }

    /// Streaming load of a whole file.
    pub async fn load(
        &self,
        path: PathBuf,
        read_ahead: usize,
    ) -> Result<(Header, PointCloud), PcxrError> {
        let job_path = path.clone();
        let loaded = self
            .run(&path, move || read_cloud(job_path, read_ahead))
            .await?;
        self.publish(CloudEvent::Loaded {
            path,
            points: loaded.0.point_count,
        });
        Ok(loaded)
    }

    /// Header read followed by a bulk read of the point-data region.
    pub async fn load_bytes(&self, path: PathBuf) -> Result<(Header, PointCloud), PcxrError> {
        let job_path = path.clone();
        let loaded = self
            .run(&path, move || crate::load_bytes(job_path))
            .await?;
        self.publish(CloudEvent::Loaded {
            path,
            points: loaded.0.point_count,
        });
        Ok(loaded)
    }

    /// Record-at-a-time save through a buffered writer.
    pub async fn save(
        &self,
        path: PathBuf,
        header: Header,
        cloud: PointCloud,
        capacity: Option<usize>,
    ) -> Result<Header, PcxrError> {
        let job_path = path.clone();
        let written = self
            .run(&path, move || {
                crate::save_cloud(job_path, &header, &cloud, capacity)
            })
            .await?;
        self.publish(CloudEvent::Saved {
            path,
            points: written.point_count,
        });
        Ok(written)
    }

    /// Replaces `path` with `header` and an encoded record blob.
    pub async fn save_array(
        &self,
        path: PathBuf,
        header: Header,
        points: Vec<u8>,
    ) -> Result<Header, PcxrError> {
        let job_path = path.clone();
        let written = self
            .run(&path, move || {
                PcxrWriter::write_point_array(job_path, &header, &points)
            })
            .await?;
        self.publish(CloudEvent::Saved {
            path,
            points: written.point_count,
        });
        Ok(written)
    }

    /// Reads only the header of `path`.
    pub async fn peek_header(&self, path: PathBuf) -> Result<Header, PcxrError> {
        let job_path = path.clone();
        self.run(&path, move || crate::read_header(job_path)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structures::Point;
    use tokio::sync::mpsc::unbounded_channel;

    fn cloud(count: u32) -> PointCloud {
        let mut floats = Vec::new();
        for i in 0..count {
            floats.extend_from_slice(&Point::at(i as f32, 1.0, 2.0, i).to_floats());
        }
        PointCloud::Floats(floats)
    }

    #[tokio::test]
    async fn test_save_then_load_publishes_events() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cloud.pcxr");
        let (tx, mut rx) = unbounded_channel();
        let workers = IoWorkers::with_events(tx);

        let written = workers
            .save(path.clone(), Header::new(5), cloud(5), Some(2))
            .await
            .unwrap();
        assert_eq!(written.point_count, 5);

        let (header, loaded) = workers.load(path.clone(), 3).await.unwrap();
        assert_eq!(header.point_count, 5);
        assert_eq!(loaded.as_floats(), cloud(5).as_floats());

        let (_, bytes) = workers.load_bytes(path.clone()).await.unwrap();
        assert_eq!(bytes.as_floats(), cloud(5).as_floats());

        assert_eq!(
            rx.recv().await,
            Some(CloudEvent::Saved {
                path: path.clone(),
                points: 5
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(CloudEvent::Loaded {
                path: path.clone(),
                points: 5
            })
        );
        assert!(!workers.is_busy(&path));
    }

    #[tokio::test]
    async fn test_busy_path_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("busy.pcxr");
        let workers = IoWorkers::new();

        let claim = workers.claim(&path).unwrap();
        assert!(workers.is_busy(&path));
        assert!(matches!(
            workers.load(path.clone(), 8).await,
            Err(PcxrError::PathBusy(p)) if p == path
        ));
        drop(claim);

        assert!(matches!(
            workers.load(path.clone(), 8).await,
            Err(PcxrError::NotFound(_))
        ));
        assert!(!workers.is_busy(&path));
    }

    #[tokio::test]
    async fn test_busy_path_matches_equivalent_spelling() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a.pcxr");
        let dotted = dir.path().join(".").join("a.pcxr");
        let workers = IoWorkers::new();

        let _claim = workers.claim(&path).unwrap();
        assert!(workers.is_busy(&dotted));
        assert!(matches!(
            workers.load(dotted.clone(), 8).await,
            Err(PcxrError::PathBusy(p)) if p == dotted
        ));
        assert!(!workers.is_busy(dir.path().join("b.pcxr")));
    }

    #[tokio::test]
    async fn test_save_array_and_peek_header() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("array.pcxr");
        let workers = IoWorkers::new();
        let blob = cloud(3).to_bytes();
        workers
            .save_array(path.clone(), Header::new(0), blob)
            .await
            .unwrap();
        let header = workers.peek_header(path).await.unwrap();
        assert_eq!(header.point_count, 3);
    }
}

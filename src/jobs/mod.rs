//! Background work queue.
//!
//! Jobs are accepted into a bounded channel and run one at a time by a single
//! worker task. Every job gets an id whose record can be polled until it ends
//! as `completed` or `failed`. Finished records are forgotten once they are
//! older than the retention window.

pub mod fake_data;
pub mod generator;

use chrono::{DateTime, Duration, Utc};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::middleware::logging::ApiError;
use generator::{generate_products, GenerateRequest};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum JobError {
    #[error("Job queue is full, try again later.")]
    QueueFull,
    #[error("Job worker is not running.")]
    WorkerStopped,
}

impl From<JobError> for ApiError {
    fn from(value: JobError) -> Self {
        ApiError::Unavailable(value.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    GenerateProducts,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

#[derive(Clone, Debug, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    pub count: u32,
    pub created: Option<u64>,
    pub error: Option<String>,
    pub requested_by: i32,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

struct QueuedJob {
    id: Uuid,
    request: GenerateRequest,
}

type JobTable = Arc<RwLock<HashMap<Uuid, Job>>>;

#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<QueuedJob>,
    jobs: JobTable,
    retention: Duration,
}

impl JobQueue {
    /// Spawns the worker; must be called inside a tokio runtime.
    pub fn start(db: Arc<DatabaseConnection>, capacity: usize, retention: Duration) -> JobQueue {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let jobs: JobTable = Arc::new(RwLock::new(HashMap::new()));

        tokio::spawn(run_worker(receiver, db, jobs.clone()));

        JobQueue {
            sender,
            jobs,
            retention,
        }
    }

    pub async fn submit(&self, request: GenerateRequest) -> Result<Uuid, JobError> {
        let id = Uuid::new_v4();
        let job = Job {
            id,
            kind: JobKind::GenerateProducts,
            status: JobStatus::Queued,
            count: request.count,
            created: None,
            error: None,
            requested_by: request.requested_by,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        // Recorded first so the worker always finds the entry.
        {
            let mut jobs = self.jobs.write().await;
            let evicted = evict_finished(&mut jobs, Utc::now(), self.retention);
            if evicted > 0 {
                debug!(evicted, "Forgot finished jobs");
            }
            jobs.insert(id, job);
        }

        if let Err(err) = self.sender.try_send(QueuedJob { id, request }) {
            self.jobs.write().await.remove(&id);
            return Err(match err {
                mpsc::error::TrySendError::Full(_) => JobError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => JobError::WorkerStopped,
            });
        }

        info!(job_id = %id, "Queued job");
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs.read().await.get(&id).cloned()
    }
}

async fn run_worker(
    mut receiver: mpsc::Receiver<QueuedJob>,
    db: Arc<DatabaseConnection>,
    jobs: JobTable,
) {
    while let Some(QueuedJob { id, request }) = receiver.recv().await {
        update(&jobs, id, |job| {
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
        })
        .await;
        info!(job_id = %id, count = request.count, requested_by = request.requested_by, "Running job");

        // A separate task turns a panic into a JoinError instead of killing the worker.
        let task_db = db.clone();
        let outcome =
            tokio::spawn(async move { generate_products(&task_db, &request).await }).await;

        let result = match outcome {
            Ok(Ok(created)) => Ok(created),
            Ok(Err(err)) => Err(format!("Database error: {err}")),
            Err(join_error) if join_error.is_panic() => Err("Job panicked".to_string()),
            Err(_) => Err("Job was cancelled".to_string()),
        };

        match &result {
            Ok(created) => info!(job_id = %id, created, "Job completed"),
            Err(message) => error!(job_id = %id, error = %message, "Job failed"),
        }

        update(&jobs, id, |job| {
            match result {
                Ok(created) => {
                    job.status = JobStatus::Completed;
                    job.created = Some(created);
                }
                Err(message) => {
                    job.status = JobStatus::Failed;
                    job.error = Some(message);
                }
            }
            job.finished_at = Some(Utc::now());
        })
        .await;
    }

    warn!("Job worker stopped");
}

/// Drops jobs that finished before `now - retention`; queued and running jobs always stay.
fn evict_finished(jobs: &mut HashMap<Uuid, Job>, now: DateTime<Utc>, retention: Duration) -> usize {
    let before = jobs.len();
    jobs.retain(|_, job| match job.finished_at {
        Some(finished_at) => now - finished_at <= retention,
        None => true,
    });
    before - jobs.len()
}

async fn update<F>(jobs: &JobTable, id: Uuid, apply: F)
where
    F: FnOnce(&mut Job),
{
    match jobs.write().await.get_mut(&id) {
        Some(job) => apply(job),
        None => warn!(job_id = %id, "Missing job record"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{connect, product, setup_schema, user};
    use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, Set};

    async fn memory_db() -> Arc<DatabaseConnection> {
        let db = connect("sqlite::memory:").await.unwrap();
        setup_schema(&db).await.unwrap();
        Arc::new(db)
    }

    async fn wait_for_end(queue: &JobQueue, id: Uuid) -> Job {
        for _ in 0..200 {
            let job = queue.get(id).await.unwrap();
            if matches!(job.status, JobStatus::Completed | JobStatus::Failed) {
                return job;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("job {id} did not finish");
    }

    #[tokio::test]
    async fn completed_job_reports_created_rows() {
        let db = memory_db().await;
        let admin = user::ActiveModel {
            username: Set("root".to_string()),
            email: Set("root@example.com".to_string()),
            password: Set("x".to_string()),
            role: Set(user::Role::Admin),
            is_active: Set(true),
            date_joined: Set(Utc::now()),
            ..Default::default()
        }
        .insert(db.as_ref())
        .await
        .unwrap();

        let queue = JobQueue::start(db.clone(), 4, Duration::hours(1));
        let id = queue
            .submit(GenerateRequest {
                requested_by: admin.id,
                count: 1200,
            })
            .await
            .unwrap();

        let job = wait_for_end(&queue, id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.created, Some(1200));
        assert!(job.finished_at.is_some());
        assert_eq!(product::Entity::find().count(db.as_ref()).await.unwrap(), 1200);
    }

    #[tokio::test]
    async fn database_failure_is_recorded_on_the_job() {
        let db = memory_db().await;
        let queue = JobQueue::start(db, 4, Duration::hours(1));

        // Nobody with this id exists, so the uploader foreign key rejects the rows.
        let id = queue
            .submit(GenerateRequest {
                requested_by: 999,
                count: 3,
            })
            .await
            .unwrap();

        let job = wait_for_end(&queue, id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().starts_with("Database error"));
        assert_eq!(job.created, None);
    }

    fn idle_queue(capacity: usize) -> (JobQueue, mpsc::Receiver<QueuedJob>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let queue = JobQueue {
            sender,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            retention: Duration::hours(1),
        };
        (queue, receiver)
    }

    fn request() -> GenerateRequest {
        GenerateRequest {
            requested_by: 1,
            count: 10,
        }
    }

    #[tokio::test]
    async fn full_queue_rejects_and_forgets_the_job() {
        let (queue, _receiver) = idle_queue(1);

        let first = queue.submit(request()).await.unwrap();
        assert_eq!(queue.get(first).await.unwrap().status, JobStatus::Queued);

        assert_eq!(queue.submit(request()).await, Err(JobError::QueueFull));
        assert_eq!(queue.jobs.read().await.len(), 1);
    }

    #[tokio::test]
    async fn stopped_worker_is_reported() {
        let (queue, receiver) = idle_queue(1);
        drop(receiver);

        assert_eq!(queue.submit(request()).await, Err(JobError::WorkerStopped));
        assert!(queue.jobs.read().await.is_empty());
    }

    fn finished(id: Uuid, status: JobStatus, finished_at: Option<DateTime<Utc>>) -> Job {
        Job {
            id,
            kind: JobKind::GenerateProducts,
            status,
            count: 10,
            created: None,
            error: None,
            requested_by: 1,
            submitted_at: Utc::now() - Duration::days(1),
            started_at: None,
            finished_at,
        }
    }

    #[test]
    fn only_old_finished_jobs_are_evicted() {
        let now = Utc::now();
        let (old, recent, running) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut jobs = HashMap::from([
            (old, finished(old, JobStatus::Completed, Some(now - Duration::hours(2)))),
            (recent, finished(recent, JobStatus::Failed, Some(now - Duration::minutes(5)))),
            (running, finished(running, JobStatus::Running, None)),
        ]);

        assert_eq!(evict_finished(&mut jobs, now, Duration::hours(1)), 1);
        assert!(!jobs.contains_key(&old));
        assert!(jobs.contains_key(&recent));
        assert!(jobs.contains_key(&running));
    }

    #[tokio::test]
    async fn submit_forgets_expired_jobs() {
        let (queue, _receiver) = idle_queue(4);
        let stale = Uuid::new_v4();
        queue.jobs.write().await.insert(
            stale,
            finished(stale, JobStatus::Completed, Some(Utc::now() - Duration::hours(3))),
        );

        let fresh = queue.submit(request()).await.unwrap();
        assert!(queue.get(stale).await.is_none());
        assert!(queue.get(fresh).await.is_some());
    }

    #[tokio::test]
    async fn unknown_job_is_none() {
        let queue = JobQueue::start(memory_db().await, 1, Duration::hours(1));
        assert!(queue.get(Uuid::new_v4()).await.is_none());
    }
}

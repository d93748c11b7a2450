//! One authenticate → query → export round trip.
//!
//! Every stage returns a `Result`; the first failure moves the run to
//! [`RunState::Failed`], is logged once with its stage, and ends the run.
use crate::earth_engine::expression::Image;
use crate::error::ExportError;
use crate::export_config::{DateRange, ExportJob};
use crate::export_request::ExportRequest;
use crate::geometry::Geometry;
use crate::imagery::{CollectionQuery, ExportTask, ImageMetadata, ImageryApi, TaskState};
use std::cmp::Ordering;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Unauthenticated,
    Authenticated,
    Queried,
    Selected,
    Clipped,
    ExportSubmitted,
    ExportCompleted,
    Failed,
}

pub struct ExportRun<'a, A: ImageryApi> {
    api: &'a A,
    job: &'a ExportJob,
    state: RunState,
}

impl<'a, A: ImageryApi> ExportRun<'a, A> {
    pub fn new(api: &'a A, job: &'a ExportJob) -> Self {
        Self {
            api,
            job,
            state: RunState::Unauthenticated,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub async fn execute(&mut self) -> Result<ExportTask, ExportError> {
        match self.try_execute().await {
            Ok(task) => Ok(task),
            Err(e) => {
                debug!(from = ?self.state, "Run failed");
                self.state = RunState::Failed;
                log_failure(&e);
                Err(e)
            }
        }
    }

    fn transition(&mut self, next: RunState) {
        debug!(from = ?self.state, to = ?next, "Run state changed");
        self.state = next;
    }

    async fn try_execute(&mut self) -> Result<ExportTask, ExportError> {
        let job = self.job;

        let session = self
            .api
            .initialize(&job.credentials)
            .await
            .map_err(ExportError::Initialization)?;
        self.transition(RunState::Authenticated);

        let query = CollectionQuery {
            collection_id: job.collection_id.clone(),
            point: job.point,
            dates: job.dates,
            cloud_cover_property: job.cloud_cover_property.clone(),
        };
        let Selection { image: best, candidates } =
            select_best_image(self.api, &session, &query).await?;
        self.transition(RunState::Queried);
        self.transition(RunState::Selected);
        info!(
            collection = %job.collection_id,
            candidates,
            image = %best.id,
            cloud_cover = ?best.cloud_cover,
            acquired = ?best.acquired,
            bands = ?best.bands,
            "Selected image metadata"
        );

        let image = Image::load(&best.id, best.bands);
        let clipped = clip_and_select_bands(&image, &Geometry::Point(job.point), &job.bands)?;
        self.transition(RunState::Clipped);

        let request = ExportRequest::build(
            clipped,
            &job.description,
            job.scale,
            job.region,
            job.file_format,
            job.destination.clone(),
            job.max_pixels,
        )?;

        let task = self
            .api
            .submit_export(&session, &request)
            .await
            .map_err(ExportError::ExportSubmission)?;
        self.transition(RunState::ExportSubmitted);
        info!(
            task = %task.name,
            destination = ?job.destination,
            width_m = job.region.width_metres(),
            height_m = job.region.height_metres(),
            "Exporting image. Check the destination for the file."
        );

        if job.wait {
            await_export(self.api, &session, &task, job.poll_interval).await?;
            self.transition(RunState::ExportCompleted);
            info!(task = %task.name, "Export completed");
        }

        Ok(task)
    }
}

fn log_failure(e: &ExportError) {
    match e {
        ExportError::Initialization(_) => error!("Initialization failed: {e}"),
        ExportError::EmptySelection { .. } => warn!("Selection empty: {e}"),
        ExportError::ExportSubmission(_) => error!("Export failed: {e}"),
        ExportError::ExportFailed { .. } => error!("Export task failed: {e}"),
        _ => error!("{e}"),
    }
}

fn empty_selection(query: &CollectionQuery) -> ExportError {
    ExportError::EmptySelection {
        collection: query.collection_id.clone(),
        start: query.dates.start(),
        end: query.dates.end(),
    }
}

/// Lowest cloud cover wins. Ties go to the image listed first, and images without a
/// cloud cover value rank after every image that has one.
pub fn least_cloudy(images: Vec<ImageMetadata>, dates: &DateRange) -> Option<ImageMetadata> {
    images
        .into_iter()
        .filter(|image| {
            image
                .acquired
                .map_or(true, |t| dates.contains(t.date_naive()))
        })
        .min_by(|a, b| match (a.cloud_cover, b.cloud_cover) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
}

/// The least cloudy image and how many images the collection query returned.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub image: ImageMetadata,
    pub candidates: usize,
}

pub async fn select_best_image<A: ImageryApi>(
    api: &A,
    session: &A::Session,
    query: &CollectionQuery,
) -> Result<Selection, ExportError> {
    let images = api
        .list_images(session, query)
        .await
        .map_err(ExportError::Query)?;
    let candidates = images.len();
    debug!(collection = %query.collection_id, candidates, "Queried image collection");
    let image = least_cloudy(images, &query.dates).ok_or_else(|| empty_selection(query))?;
    Ok(Selection { image, candidates })
}

pub fn clip_and_select_bands(
    image: &Image,
    geometry: &Geometry,
    bands: &[String],
) -> Result<Image, ExportError> {
    image.clip(geometry).select(bands)
}

/// Polls until the task reaches a terminal state.
pub async fn await_export<A: ImageryApi>(
    api: &A,
    session: &A::Session,
    task: &ExportTask,
    poll_interval: Duration,
) -> Result<(), ExportError> {
    loop {
        let state = api
            .task_status(session, task)
            .await
            .map_err(|e| ExportError::ExportFailed {
                task: task.name.clone(),
                state: "UNKNOWN".to_string(),
                message: format!("{e:#}"),
            })?;

        match state {
            TaskState::Succeeded => return Ok(()),
            TaskState::Failed(message) => {
                return Err(ExportError::ExportFailed {
                    task: task.name.clone(),
                    state: "FAILED".to_string(),
                    message,
                })
            }
            TaskState::Cancelled => {
                return Err(ExportError::ExportFailed {
                    task: task.name.clone(),
                    state: "CANCELLED".to_string(),
                    message: "the task was cancelled".to_string(),
                })
            }
            TaskState::Pending | TaskState::Running => {
                info!(task = %task.name, state = ?state, "Exporting...");
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export_config::{export_config_toml, ExportConfig};
    use anyhow::{anyhow, Result};
    use chrono::{TimeZone, Utc};
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockApi {
        init_fails: bool,
        images: Vec<ImageMetadata>,
        export_fails: bool,
        statuses: Mutex<VecDeque<TaskState>>,
        list_calls: AtomicUsize,
        submit_calls: AtomicUsize,
        submitted: Mutex<Option<ExportRequest>>,
    }

    impl ImageryApi for MockApi {
        type Session = ();

        async fn initialize(self: &Self, _credentials: &Path) -> Result<()> {
            if self.init_fails {
                return Err(anyhow!("invalid_grant: account not found"));
            }
            Ok(())
        }

        async fn list_images(
            self: &Self,
            _session: &(),
            _query: &CollectionQuery,
        ) -> Result<Vec<ImageMetadata>> {
            self.list_calls.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(self.images.clone())
        }

        async fn submit_export(
            self: &Self,
            _session: &(),
            request: &ExportRequest,
        ) -> Result<ExportTask> {
            self.submit_calls.fetch_add(1, AtomicOrdering::SeqCst);
            *self.submitted.lock().unwrap() = Some(request.clone());
            if self.export_fails {
                return Err(anyhow!("HTTP 400 INVALID_ARGUMENT"));
            }
            Ok(ExportTask {
                name: "projects/dufek-lab/operations/TASK1".to_string(),
            })
        }

        async fn task_status(self: &Self, _session: &(), _task: &ExportTask) -> Result<TaskState> {
            self.statuses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow!("no more statuses"))
        }
    }

    fn job() -> ExportJob {
        let mut config = ExportConfig::from_template(&export_config_toml()).unwrap();
        config.poll_interval_secs = 0;
        config.validate().unwrap()
    }

    fn landsat(scene: &str, cloud_cover: Option<f64>) -> ImageMetadata {
        ImageMetadata {
            id: format!("LANDSAT/LC08/C02/T1_TOA/{scene}"),
            acquired: Some(Utc.with_ymd_and_hms(2024, 7, 12, 18, 53, 0).unwrap()),
            cloud_cover,
            bands: ["B1", "B2", "B3", "B4", "B5"].iter().map(|s| s.to_string()).collect(),
        }
    }

    fn submitted_image_id(api: &MockApi) -> String {
        api.submitted
            .lock()
            .unwrap()
            .as_ref()
            .map(|r| r.image.id().to_string())
            .unwrap()
    }

    #[tokio::test]
    async fn test_selects_least_cloudy_image() {
        let api = MockApi {
            images: vec![
                landsat("LC08_046029_20240103", Some(40.0)),
                landsat("LC08_046029_20240712", Some(12.0)),
                landsat("LC08_046029_20241017", Some(75.0)),
            ],
            ..Default::default()
        };
        let job = job();
        let mut run = ExportRun::new(&api, &job);
        let task = run.execute().await.unwrap();

        assert_eq!(task.name, "projects/dufek-lab/operations/TASK1");
        assert_eq!(run.state(), RunState::ExportSubmitted);
        assert_eq!(
            submitted_image_id(&api),
            "LANDSAT/LC08/C02/T1_TOA/LC08_046029_20240712"
        );
        let submitted = api.submitted.lock().unwrap().clone().unwrap();
        assert_eq!(submitted.image.bands(), job.bands.as_slice());
        assert_eq!(submitted.region, job.region);
    }

    #[tokio::test]
    async fn test_empty_collection_reports_empty_selection() {
        let api = MockApi::default();
        let job = job();
        let mut run = ExportRun::new(&api, &job);
        let err = run.execute().await.unwrap_err();

        assert!(matches!(err, ExportError::EmptySelection { .. }));
        assert_eq!(run.state(), RunState::Failed);
        assert_eq!(api.list_calls.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(api.submit_calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejected_export_is_attempted_once() {
        let api = MockApi {
            images: vec![landsat("LC08_046029_20240712", Some(12.0))],
            export_fails: true,
            ..Default::default()
        };
        let job = job();
        let mut run = ExportRun::new(&api, &job);
        let err = run.execute().await.unwrap_err();

        assert!(matches!(err, ExportError::ExportSubmission(_)));
        assert_eq!(run.state(), RunState::Failed);
        assert_eq!(api.submit_calls.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_initialization_failure_stops_the_run() {
        let api = MockApi {
            init_fails: true,
            images: vec![landsat("LC08_046029_20240712", Some(12.0))],
            ..Default::default()
        };
        let job = job();
        let mut run = ExportRun::new(&api, &job);
        let err = run.execute().await.unwrap_err();

        assert!(matches!(err, ExportError::Initialization(_)));
        assert_eq!(run.state(), RunState::Failed);
        assert_eq!(api.list_calls.load(AtomicOrdering::SeqCst), 0);
        assert_eq!(api.submit_calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_band_blocks_export() {
        let mut image = landsat("LC08_046029_20240712", Some(12.0));
        image.bands = vec!["B2".to_string(), "B3".to_string()];
        let api = MockApi {
            images: vec![image],
            ..Default::default()
        };
        let job = job();
        let mut run = ExportRun::new(&api, &job);
        let err = run.execute().await.unwrap_err();

        match err {
            ExportError::MissingBands { missing, .. } => assert_eq!(missing, vec!["B4"]),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(api.submit_calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wait_until_export_completes() {
        let api = MockApi {
            images: vec![landsat("LC08_046029_20240712", Some(12.0))],
            statuses: Mutex::new(VecDeque::from([
                TaskState::Pending,
                TaskState::Running,
                TaskState::Succeeded,
            ])),
            ..Default::default()
        };
        let mut job = job();
        job.wait = true;
        let mut run = ExportRun::new(&api, &job);
        run.execute().await.unwrap();

        assert_eq!(run.state(), RunState::ExportCompleted);
        assert!(api.statuses.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wait_reports_failed_task() {
        let api = MockApi {
            images: vec![landsat("LC08_046029_20240712", Some(12.0))],
            statuses: Mutex::new(VecDeque::from([
                TaskState::Running,
                TaskState::Failed("Too many pixels in the region".to_string()),
            ])),
            ..Default::default()
        };
        let mut job = job();
        job.wait = true;
        let mut run = ExportRun::new(&api, &job);
        let err = run.execute().await.unwrap_err();

        match err {
            ExportError::ExportFailed { state, message, .. } => {
                assert_eq!(state, "FAILED");
                assert_eq!(message, "Too many pixels in the region");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(run.state(), RunState::Failed);
    }

    #[tokio::test]
    async fn test_select_best_image() {
        let api = MockApi {
            images: vec![
                landsat("A", Some(40.0)),
                landsat("B", Some(12.0)),
                landsat("C", Some(75.0)),
            ],
            ..Default::default()
        };
        let job = job();
        let query = CollectionQuery {
            collection_id: job.collection_id.clone(),
            point: job.point,
            dates: job.dates,
            cloud_cover_property: job.cloud_cover_property.clone(),
        };
        let selection = select_best_image(&api, &(), &query).await.unwrap();
        assert_eq!(selection.image.cloud_cover, Some(12.0));
        assert_eq!(selection.candidates, 3);
        assert_eq!(api.list_calls.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn test_ties_resolve_to_first_listed() {
        let images = vec![
            landsat("first", Some(5.0)),
            landsat("second", Some(5.0)),
            landsat("third", Some(30.0)),
        ];
        let best = least_cloudy(images, &job().dates).unwrap();
        assert!(best.id.ends_with("first"));
    }

    #[test]
    fn test_unknown_cloud_cover_ranks_last() {
        let images = vec![landsat("unknown", None), landsat("cloudy", Some(99.0))];
        let best = least_cloudy(images, &job().dates).unwrap();
        assert!(best.id.ends_with("cloudy"));

        let best = least_cloudy(vec![landsat("unknown", None)], &job().dates).unwrap();
        assert!(best.id.ends_with("unknown"));
    }

    #[test]
    fn test_images_outside_date_range_are_ignored() {
        let mut late = landsat("late", Some(1.0));
        late.acquired = Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        let mut last_day = landsat("last_day", Some(20.0));
        last_day.acquired = Some(Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap());

        let best = least_cloudy(vec![late, last_day], &job().dates).unwrap();
        assert!(best.id.ends_with("last_day"));
    }

    #[test]
    fn test_least_cloudy_of_nothing() {
        assert!(least_cloudy(vec![], &job().dates).is_none());
    }
}

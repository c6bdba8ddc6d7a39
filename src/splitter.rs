use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use futures::{stream, StreamExt};
use glob::Pattern;
use rand::seq::index;
use tokio::task;

use crate::{
    errors::ExtractError,
    sink::RecordSink,
    types::{DownloadedRecord, FrameRecord, SplitResult},
    utils::{file_stem, EXTRACTOR_PROGRAM, FRAMES_OUTPUT_PER_SEC, IMAGE_DIR, MAX_FRAMES_PER_VOD},
};

#[derive(Builder, Debug, Clone)]
#[builder(setter(into))]
pub struct SplitterOptions {
    #[builder(default = "EXTRACTOR_PROGRAM.into()")]
    pub program: String,
    // frames captured per second of video
    #[builder(default = "FRAMES_OUTPUT_PER_SEC")]
    pub fps: f64,
    #[builder(default = "MAX_FRAMES_PER_VOD")]
    pub max_frames_per_vod: usize,
    #[builder(default = "self.default_image_dir()")]
    pub image_dir: PathBuf,
    #[builder(default = "num_cpus::get()")]
    pub processes: usize,
}

impl SplitterOptions {
    pub fn default_builder() -> SplitterOptionsBuilder {
        SplitterOptionsBuilder::default()
    }
}

impl SplitterOptionsBuilder {
    fn default_image_dir(&self) -> PathBuf {
        PathBuf::from(IMAGE_DIR)
    }
}

/// Writes numbered still frames of a video following an output pattern such as
/// `data/images/abc.%03d.jpg`.
pub trait FrameExtractor: Send + Sync + 'static {
    fn extract(&self, video: &Path, fps: f64, output_pattern: &Path) -> Result<(), ExtractError>;
}

pub struct Ffmpeg {
    program: String,
}

impl Ffmpeg {
    pub fn new(program: impl Into<String>) -> Self {
        Ffmpeg {
            program: program.into(),
        }
    }

    fn command(&self, video: &Path, fps: f64, output_pattern: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-nostdin")
            .arg("-i")
            .arg(video)
            .arg("-r")
            .arg(fps.to_string())
            .args(["-loglevel", "error"])
            .arg(output_pattern);
        cmd
    }
}

impl FrameExtractor for Ffmpeg {
    fn extract(&self, video: &Path, fps: f64, output_pattern: &Path) -> Result<(), ExtractError> {
        let status = self
            .command(video, fps, output_pattern)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .map_err(|source| ExtractError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if !status.success() {
            return Err(ExtractError::Failed {
                program: self.program.clone(),
                status: status.to_string(),
                video: video.to_path_buf(),
            });
        }
        Ok(())
    }
}

/// Frames kept and removed for one video.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SplitOutcome {
    pub frames: Vec<FrameRecord>,
    pub discarded: usize,
}

/// Keeps a uniform random subset of `max` frames and deletes the rest. Returns the kept
/// frames and how many files were deleted.
pub fn cap_frames(frames: Vec<PathBuf>, max: usize) -> (Vec<PathBuf>, usize) {
    if frames.len() <= max {
        return (frames, 0);
    }
    let mut rng = rand::thread_rng();
    let selected = index::sample(&mut rng, frames.len(), max)
        .into_iter()
        .collect::<HashSet<usize>>();

    let mut kept = Vec::with_capacity(max);
    let mut discarded = 0;
    for (i, frame) in frames.into_iter().enumerate() {
        if selected.contains(&i) {
            kept.push(frame);
            continue;
        }
        match fs::remove_file(&frame) {
            Ok(_) => discarded += 1,
            Err(e) => warn!("could not remove excess frame {:?}: {}", frame, e),
        }
    }
    (kept, discarded)
}

pub struct FrameSplitter<E> {
    extractor: Arc<E>,
    options: SplitterOptions,
}

impl FrameSplitter<Ffmpeg> {
    pub fn new(options: SplitterOptions) -> Self {
        FrameSplitter::with_extractor(Ffmpeg::new(options.program.clone()), options)
    }
}

impl<E: FrameExtractor> FrameSplitter<E> {
    pub fn with_extractor(extractor: E, options: SplitterOptions) -> Self {
        FrameSplitter {
            extractor: Arc::new(extractor),
            options,
        }
    }

    /// Splits one downloaded video into at most `max_frames_per_vod` labelled frames and
    /// removes the video. Extraction failures are not retried.
    pub fn split(&self, vod: &DownloadedRecord) -> Result<SplitOutcome, ExtractError> {
        split_video(&*self.extractor, &self.options, vod)
    }

    /// Splits every video with at most `processes` extractions in flight, writing each
    /// video's frames to `sink` as soon as it is done.
    pub async fn run(
        &self,
        vods: impl Iterator<Item = DownloadedRecord> + Send,
        sink: &RecordSink,
        should_terminate: Arc<AtomicBool>,
    ) -> SplitResult {
        let mut result = SplitResult::default();
        if let Err(e) = fs::create_dir_all(&self.options.image_dir) {
            error!("could not create {:?}: {}", self.options.image_dir, e);
        }

        let mut splits = stream::iter(vods)
            .take_while(|_| futures::future::ready(!should_terminate.load(Ordering::Relaxed)))
            .map(|vod| {
                let extractor = self.extractor.clone();
                let options = self.options.clone();
                task::spawn_blocking(move || {
                    let outcome = split_video(&*extractor, &options, &vod);
                    (vod, outcome)
                })
            })
            .buffer_unordered(self.options.processes.max(1));

        while let Some(joined) = splits.next().await {
            let (vod, outcome) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!("split worker panicked: {}", e);
                    result.videos_failed += 1;
                    continue;
                }
            };
            match outcome {
                Ok(outcome) => {
                    result.videos_split += 1;
                    result.frames_discarded += outcome.discarded;
                    match sink.append_all(&outcome.frames) {
                        Ok(n) => result.frames_kept += n,
                        Err(e) => error!("could not record frames of {:?}: {}", vod.video_path, e),
                    }
                }
                Err(e) => {
                    error!("skipping {:?}: {}", vod.video_path, e);
                    result.videos_failed += 1;
                }
            }
        }

        info!(
            "{} videos split into {} frames ({} discarded), {} failed",
            result.videos_split, result.frames_kept, result.frames_discarded, result.videos_failed
        );
        result
    }
}

fn split_video<E: FrameExtractor + ?Sized>(
    extractor: &E,
    options: &SplitterOptions,
    vod: &DownloadedRecord,
) -> Result<SplitOutcome, ExtractError> {
    let stem = file_stem(&vod.video_path);
    // ffmpeg reads % sequences in the output name
    let output_pattern = options
        .image_dir
        .join(format!("{}.%03d.jpg", stem.replace('%', "%%")));
    extractor.extract(&vod.video_path, options.fps, &output_pattern)?;

    let frame_glob = Path::new(&Pattern::escape(&options.image_dir.to_string_lossy()))
        .join(format!("{}.[0-9]*.jpg", Pattern::escape(&stem)))
        .to_string_lossy()
        .into_owned();
    let mut frames = glob::glob(&frame_glob)
        .map_err(|e| ExtractError::Pattern(e.to_string()))?
        .filter_map(Result::ok)
        .collect::<Vec<PathBuf>>();
    frames.sort();

    let (kept, discarded) = cap_frames(frames, options.max_frames_per_vod);

    if let Err(e) = fs::remove_file(&vod.video_path) {
        warn!("could not remove {:?} after splitting: {}", vod.video_path, e);
    }

    debug!(
        "{:?} split into {} frames, {} discarded",
        vod.video_path,
        kept.len(),
        discarded
    );
    Ok(SplitOutcome {
        frames: kept
            .into_iter()
            .map(|frame_path| FrameRecord {
                frame_path,
                characters: vod.characters.clone(),
            })
            .collect(),
        discarded,
    })
}

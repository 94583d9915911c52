use cowatch_proto::{FontAsset, SubtitleTrack};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::ready::{ManifestReady, ReadySignal};
use super::toolkit::{MediaToolkit, ProbeStream};
use super::TranscodeError;
use crate::{Error, Result};

const SUBTITLES_DIR: &str = "subtitles";
const FONTS_DIR: &str = "fonts";

/// Advertised in the master playlist; the transcoder's own playlist carries
/// the real segment bitrates.
const DEFAULT_BANDWIDTH: u64 = 5_000_000;

/// Playable description of one live transcode. All URIs are relative to the
/// session's public directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub manifest_file_name: String,
    pub duration_seconds: u64,
    pub subtitle_tracks: Vec<SubtitleTrack>,
    pub font_assets: Vec<FontAsset>,
}

/// Builds the [`Manifest`] for a transcode once its video playlist exists.
///
/// Generation runs at most once per generator; every later call returns the
/// same `Arc`.
pub struct ManifestGenerator {
    source: PathBuf,
    public_dir: PathBuf,
    output_dir: PathBuf,
    /// `output_dir` relative to `public_dir`, `/`-separated
    output_prefix: String,
    ready: ReadySignal,
    toolkit: Arc<dyn MediaToolkit>,
    ready_timeout: Duration,
    manifest: OnceCell<Arc<Manifest>>,
}

impl std::fmt::Debug for ManifestGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestGenerator")
            .field("source", &self.source)
            .field("output_dir", &self.output_dir)
            .field("generated", &self.manifest.initialized())
            .finish_non_exhaustive()
    }
}

impl ManifestGenerator {
    /// `output_dir` is the transcoder's working directory and must live
    /// inside `public_dir`.
    pub fn new(
        source: impl Into<PathBuf>,
        public_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        ready: ReadySignal,
        toolkit: Arc<dyn MediaToolkit>,
        ready_timeout: Duration,
    ) -> Result<Self> {
        let public_dir = public_dir.into();
        let output_dir = output_dir.into();

        let output_prefix = output_dir
            .strip_prefix(&public_dir)
            .ok()
            .and_then(relative_uri)
            .filter(|prefix| !prefix.is_empty())
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "Transcode output {} is not inside {}",
                    output_dir.display(),
                    public_dir.display()
                ))
            })?;

        Ok(Self {
            source: source.into(),
            public_dir,
            output_dir,
            output_prefix,
            ready,
            toolkit,
            ready_timeout,
            manifest: OnceCell::new(),
        })
    }

    /// Generate the manifest, or return the one already generated.
    pub async fn generate(&self) -> Result<Arc<Manifest>> {
        self.manifest
            .get_or_try_init(|| self.build())
            .await
            .cloned()
    }

    async fn build(&self) -> Result<Arc<Manifest>> {
        let report = self.toolkit.probe(&self.source).await?;
        debug!(
            source = %self.source.display(),
            streams = report.streams.len(),
            "Probed transcode source"
        );

        let ready = tokio::time::timeout(self.ready_timeout, self.ready.wait())
            .await
            .map_err(|_| TranscodeError::Timeout(self.ready_timeout))??;
        let playlist_uri = self.playlist_uri(&ready)?;

        let mut subtitle_tracks = Vec::new();
        let mut font_assets = Vec::new();
        let mut font_names = HashSet::new();

        for stream in &report.streams {
            if stream.is_subtitle() {
                if let Some(track) = self.extract_subtitle(stream).await {
                    subtitle_tracks.push(track);
                }
            } else if stream.is_attachment() {
                if let Some(font) = self.dump_font(stream, &mut font_names).await {
                    font_assets.push(font);
                }
            }
        }

        let manifest_file_name = format!("{}.m3u8", self.output_prefix);
        let master = master_playlist(&playlist_uri);
        tokio::fs::write(self.public_dir.join(&manifest_file_name), master).await?;

        info!(
            manifest = %manifest_file_name,
            duration_seconds = ready.duration_seconds,
            subtitles = subtitle_tracks.len(),
            fonts = font_assets.len(),
            "Manifest generated"
        );

        Ok(Arc::new(Manifest {
            manifest_file_name,
            duration_seconds: ready.duration_seconds,
            subtitle_tracks,
            font_assets,
        }))
    }

    fn playlist_uri(&self, ready: &ManifestReady) -> Result<String> {
        let relative = relative_uri(&ready.path).ok_or_else(|| {
            TranscodeError::Protocol(format!(
                "manifest path {} escapes the output directory",
                ready.path.display()
            ))
        })?;
        Ok(format!("{}/{relative}", self.output_prefix))
    }

    async fn extract_subtitle(&self, stream: &ProbeStream) -> Option<SubtitleTrack> {
        let codec = stream.codec_name.as_deref().unwrap_or("unknown");
        let Some(extension) = subtitle_extension(codec) else {
            warn!(
                stream = stream.index,
                codec, "Skipping subtitle stream with unsupported codec"
            );
            return None;
        };

        let language_tag = sanitize_component(stream.language_tag())
            .unwrap_or_else(|| "und".to_string());
        let file_name = format!("{language_tag}-{}.{extension}", stream.index);
        let dir = self.output_dir.join(SUBTITLES_DIR);

        let extracted = async {
            tokio::fs::create_dir_all(&dir).await?;
            self.toolkit
                .extract_stream(&self.source, stream.index, &dir.join(&file_name))
                .await
        };
        if let Err(e) = extracted.await {
            warn!(stream = stream.index, codec, error = %e, "Subtitle extraction failed");
            return None;
        }

        Some(SubtitleTrack {
            title: stream
                .tags
                .title
                .clone()
                .unwrap_or_else(|| language_tag.clone()),
            language_tag,
            codec: codec.to_string(),
            uri: format!("{}/{SUBTITLES_DIR}/{file_name}", self.output_prefix),
        })
    }

    async fn dump_font(
        &self,
        stream: &ProbeStream,
        taken: &mut HashSet<String>,
    ) -> Option<FontAsset> {
        let kind = stream.font_kind()?;

        let mut file_name = stream
            .tags
            .filename
            .as_deref()
            .and_then(|name| Path::new(name).file_name())
            .and_then(|name| name.to_str())
            .and_then(sanitize_component)
            .unwrap_or_else(|| format!("font-{}.{}", stream.index, kind.extension()));
        if !taken.insert(file_name.clone()) {
            file_name = format!("{}-{file_name}", stream.index);
            taken.insert(file_name.clone());
        }

        let dir = self.output_dir.join(FONTS_DIR);
        let dumped = async {
            tokio::fs::create_dir_all(&dir).await?;
            self.toolkit
                .dump_attachment(&self.source, stream.index, &dir.join(&file_name))
                .await
        };
        if let Err(e) = dumped.await {
            warn!(stream = stream.index, file = %file_name, error = %e, "Font extraction failed");
            return None;
        }

        Some(FontAsset {
            uri: format!("{}/{FONTS_DIR}/{file_name}", self.output_prefix),
        })
    }
}

fn subtitle_extension(codec: &str) -> Option<&'static str> {
    match codec {
        "ass" => Some("ass"),
        "ssa" => Some("ssa"),
        "webvtt" => Some("vtt"),
        _ => None,
    }
}

/// Join the normal components of a relative path with `/`; `None` for
/// absolute paths and paths containing `..`.
fn relative_uri(path: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(parts.join("/"))
}

/// Keep a single file-name component safe for URIs.
fn sanitize_component(name: &str) -> Option<String> {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    (!cleaned.is_empty()).then_some(cleaned)
}

fn master_playlist(playlist_uri: &str) -> String {
    let mut m3u8 = String::new();
    m3u8.push_str("#EXTM3U\n");
    m3u8.push_str("#EXT-X-VERSION:3\n");
    m3u8.push_str("#EXT-X-INDEPENDENT-SEGMENTS\n");
    let _ = writeln!(m3u8, "#EXT-X-STREAM-INF:BANDWIDTH={DEFAULT_BANDWIDTH}");
    // The master playlist sits next to the transcode directory.
    let _ = writeln!(m3u8, "{playlist_uri}");
    m3u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcode::toolkit::{MockMediaToolkit, ProbeReport, StreamTags};

    fn stream(index: u32, codec_type: &str, codec_name: Option<&str>, tags: StreamTags) -> ProbeStream {
        ProbeStream {
            index,
            codec_type: Some(codec_type.to_string()),
            codec_name: codec_name.map(str::to_string),
            tags,
        }
    }

    fn report() -> ProbeReport {
        ProbeReport {
            streams: vec![
                stream(0, "video", Some("h264"), StreamTags::default()),
                stream(
                    1,
                    "subtitle",
                    Some("ass"),
                    StreamTags {
                        language: Some("eng".to_string()),
                        title: Some("Signs".to_string()),
                        ..StreamTags::default()
                    },
                ),
                stream(2, "subtitle", Some("hdmv_pgs_subtitle"), StreamTags::default()),
                stream(
                    3,
                    "attachment",
                    Some("ttf"),
                    StreamTags {
                        filename: Some("Open Sans.ttf".to_string()),
                        ..StreamTags::default()
                    },
                ),
            ],
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        public: PathBuf,
        output: PathBuf,
        ready: ReadySignal,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let public = dir.path().join("public");
        let output = public.join("transcode-abc");
        std::fs::create_dir_all(&output).unwrap();
        Fixture {
            _dir: dir,
            public,
            output,
            ready: ReadySignal::new(),
        }
    }

    fn generator(fixture: &Fixture, toolkit: MockMediaToolkit, timeout: Duration) -> ManifestGenerator {
        ManifestGenerator::new(
            fixture.public.join("source.mkv"),
            &fixture.public,
            &fixture.output,
            fixture.ready.clone(),
            Arc::new(toolkit),
            timeout,
        )
        .unwrap()
    }

    fn resolve(fixture: &Fixture, path: &str) {
        fixture
            .ready
            .resolve(ManifestReady {
                path: PathBuf::from(path),
                duration_seconds: 734,
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_generation_runs_extraction_once() {
        let fixture = fixture();
        let mut toolkit = MockMediaToolkit::new();
        toolkit
            .expect_probe()
            .times(1)
            .returning(|_| Ok(report()));
        toolkit
            .expect_extract_stream()
            .withf(|_, index, dest| *index == 1 && dest.ends_with("subtitles/eng-1.ass"))
            .times(1)
            .returning(|_, _, _| Ok(()));
        toolkit
            .expect_dump_attachment()
            .withf(|_, index, dest| *index == 3 && dest.ends_with("fonts/OpenSans.ttf"))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let generator = generator(&fixture, toolkit, Duration::from_secs(5));
        resolve(&fixture, "stream/index.m3u8");

        let first = generator.generate().await.unwrap();
        let second = generator.generate().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first, second);

        assert_eq!(first.manifest_file_name, "transcode-abc.m3u8");
        assert_eq!(first.duration_seconds, 734);
        assert_eq!(
            first.subtitle_tracks,
            vec![SubtitleTrack {
                title: "Signs".to_string(),
                language_tag: "eng".to_string(),
                codec: "ass".to_string(),
                uri: "transcode-abc/subtitles/eng-1.ass".to_string(),
            }]
        );
        assert_eq!(
            first.font_assets,
            vec![FontAsset {
                uri: "transcode-abc/fonts/OpenSans.ttf".to_string()
            }]
        );

        let master = std::fs::read_to_string(fixture.public.join("transcode-abc.m3u8")).unwrap();
        assert!(master.starts_with("#EXTM3U\n"));
        assert!(master.contains("\ntranscode-abc/stream/index.m3u8\n"));
    }

    #[tokio::test]
    async fn test_extraction_failures_are_not_fatal() {
        let fixture = fixture();
        let mut toolkit = MockMediaToolkit::new();
        toolkit.expect_probe().returning(|_| Ok(report()));
        toolkit
            .expect_extract_stream()
            .returning(|_, _, _| Err(Error::Process("ffmpeg exited with 1".to_string())));
        toolkit
            .expect_dump_attachment()
            .returning(|_, _, _| Err(Error::Process("ffmpeg exited with 1".to_string())));

        let generator = generator(&fixture, toolkit, Duration::from_secs(5));
        resolve(&fixture, "index.m3u8");

        let manifest = generator.generate().await.unwrap();
        assert!(manifest.subtitle_tracks.is_empty());
        assert!(manifest.font_assets.is_empty());
    }

    #[tokio::test]
    async fn test_probe_failure_is_fatal() {
        let fixture = fixture();
        let mut toolkit = MockMediaToolkit::new();
        toolkit
            .expect_probe()
            .returning(|_| Err(Error::Probe("no such file".to_string())));

        let generator = generator(&fixture, toolkit, Duration::from_secs(5));
        resolve(&fixture, "index.m3u8");

        assert!(matches!(generator.generate().await, Err(Error::Probe(_))));
    }

    #[tokio::test]
    async fn test_process_failure_propagates() {
        let fixture = fixture();
        let mut toolkit = MockMediaToolkit::new();
        toolkit.expect_probe().returning(|_| Ok(ProbeReport::default()));

        let generator = generator(&fixture, toolkit, Duration::from_secs(5));
        fixture
            .ready
            .reject(TranscodeError::ProcessExited {
                status: "exit status: 1".to_string(),
            })
            .unwrap();

        assert!(matches!(
            generator.generate().await,
            Err(Error::Transcode(TranscodeError::ProcessExited { .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_wait_times_out() {
        let fixture = fixture();
        let mut toolkit = MockMediaToolkit::new();
        toolkit.expect_probe().returning(|_| Ok(ProbeReport::default()));

        let generator = generator(&fixture, toolkit, Duration::from_secs(30));
        assert!(matches!(
            generator.generate().await,
            Err(Error::Transcode(TranscodeError::Timeout(_)))
        ));
    }

    #[tokio::test]
    async fn test_escaping_playlist_path_is_rejected() {
        let fixture = fixture();
        let mut toolkit = MockMediaToolkit::new();
        toolkit.expect_probe().returning(|_| Ok(ProbeReport::default()));

        let generator = generator(&fixture, toolkit, Duration::from_secs(5));
        resolve(&fixture, "../../etc/passwd");

        assert!(matches!(
            generator.generate().await,
            Err(Error::Transcode(TranscodeError::Protocol(_)))
        ));
    }

    #[test]
    fn test_output_dir_must_be_inside_public() {
        let result = ManifestGenerator::new(
            "/s/source.mkv",
            "/s/public",
            "/elsewhere/out",
            ReadySignal::new(),
            Arc::new(MockMediaToolkit::new()),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}

use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use transcript_contributor::cli::{Cli, Commands};
use transcript_contributor::config::{Config, TranscriptionEngine};
use transcript_contributor::metadata::direct::DirectResolver;
use transcript_contributor::metadata::youtube::YoutubeResolver;
use transcript_contributor::metadata::SourceMetadataResolver;
use transcript_contributor::pipeline::{ContributionPipeline, PipelineOutcome, PipelineSettings};
use transcript_contributor::repository::git::GitCli;
use transcript_contributor::repository::github::establish_session;
use transcript_contributor::repository::{GatewaySettings, RepoRef, RepositoryGateway};
use transcript_contributor::error::ContributionError;
use transcript_contributor::source::{ContributionRequest, SourceIdentifier, SourceInput};
use transcript_contributor::transcribe::aws::AwsTranscriber;
use transcript_contributor::transcribe::whisper::WhisperTranscriber;
use transcript_contributor::transcribe::{MediaFetcher, Transcriber};
use transcript_contributor::utils::check_dependencies;

/// Request fields of the `add` command, applied to every source it expands to
struct RequestOptions {
    loc: String,
    title: Option<String>,
    date: Option<String>,
    tags: Option<String>,
    speakers: Option<String>,
    category: Option<String>,
    chapters: bool,
}

impl RequestOptions {
    fn build(&self, source: SourceIdentifier) -> Result<ContributionRequest> {
        let mut request = ContributionRequest::for_source(source, &self.loc)?.with_chapters(self.chapters);
        if let Some(title) = &self.title {
            request = request.with_title(title.as_str());
        }
        if let Some(date) = &self.date {
            request = request.with_event_date(date)?;
        }
        if let Some(tags) = &self.tags {
            request = request.with_tags(tags);
        }
        if let Some(speakers) = &self.speakers {
            request = request.with_speakers(speakers);
        }
        if let Some(category) = &self.category {
            request = request.with_categories(category);
        }
        request.validate()?;
        Ok(request)
    }
}

/// Options of the `add` command after parsing
struct AddArgs {
    input: SourceInput,
    options: RequestOptions,
    engine: Option<TranscriptionEngine>,
    model: Option<String>,
    language: Option<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(&cli);

    match cli.command {
        Commands::Add {
            source,
            loc,
            title,
            date,
            tags,
            speakers,
            category,
            chapters,
            engine,
            model,
            language,
        } => {
            let options = RequestOptions {
                loc,
                title,
                date,
                tags,
                speakers,
                category,
                chapters,
            };

            // reject malformed input before touching config, network or disk
            let input = SourceInput::parse(&source)?;
            match &input {
                SourceInput::Single(source) => {
                    options.build(source.clone())?;
                }
                SourceInput::Playlist { id } => {
                    if options.title.is_some() {
                        anyhow::bail!("--title cannot be used with a playlist, each video keeps its own title");
                    }
                    // location and date are checked once here, before listing the videos
                    options.build(SourceIdentifier::Video { id: id.clone() })?;
                }
            }

            let config = Config::load().await?;
            add(
                config,
                AddArgs {
                    input,
                    options,
                    engine,
                    model,
                    language,
                },
            )
            .await
        }
        Commands::Config { show } => {
            let config = Config::load().await?;
            if show {
                config.display();
            } else {
                config.setup_hint()?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Sources => {
            println!("Supported sources:");
            println!("  • YouTube video ids (e.g. dQw4w9WgXcQ)");
            println!("  • YouTube URLs (youtube.com/watch, youtu.be, /embed, /shorts)");
            println!("  • YouTube playlists (playlist URLs or PL... ids), one pull request per video");
            println!("  • Direct audio URLs over http(s) (--title required)");
            println!("  • Local media files (--title required)");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(cli: &Cli) {
    let default_filter = if cli.verbose {
        "transcript_contributor=debug"
    } else if cli.quiet {
        "transcript_contributor=warn"
    } else {
        "transcript_contributor=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let json = cli.log_json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let text = (!cli.log_json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text)
        .init();
}

async fn add(mut config: Config, args: AddArgs) -> Result<ExitCode> {
    let AddArgs {
        input,
        options,
        engine,
        model,
        language,
    } = args;

    if let Some(engine) = engine {
        config.app.engine = engine;
    }
    if let Some(model) = model {
        config.whisper.model = model;
    }
    config.validate()?;

    let mut tools = vec!["git"];
    if input.needs_yt_dlp() {
        tools.push(config.app.yt_dlp_path.as_str());
    }
    if config.app.engine == TranscriptionEngine::Whisper {
        tools.push(config.whisper.binary.as_str());
    }
    check_dependencies(&tools).await?;

    let requests = match &input {
        SourceInput::Single(source) => vec![options.build(source.clone())?],
        SourceInput::Playlist { id } => {
            let youtube = YoutubeResolver::new(&config.app.yt_dlp_path, config.command_timeout());
            let youtube = &youtube;
            let id = id.as_str();
            let videos = config
                .retry_policy()
                .run("list playlist", move || async move {
                    youtube.playlist_videos(id).await.map_err(ContributionError::from)
                })
                .await?;
            videos
                .into_iter()
                .map(|video| options.build(video))
                .collect::<Result<Vec<_>>>()?
        }
    };

    let (api, session) = establish_session(
        &config.github,
        config.network_timeout(),
        config.command_timeout(),
    )
    .await?;

    let http = reqwest::Client::builder()
        .timeout(config.network_timeout())
        .build()
        .context("Failed to build HTTP client")?;
    let fetcher = MediaFetcher::new(http.clone(), &config.app.yt_dlp_path, config.command_timeout());

    let transcriber: Arc<dyn Transcriber> = match config.app.engine {
        TranscriptionEngine::Aws => Arc::new(
            AwsTranscriber::new(config.aws.clone(), fetcher, http.clone(), language).await,
        ),
        TranscriptionEngine::Whisper => Arc::new(WhisperTranscriber::new(
            &config.whisper.binary,
            &config.whisper.model,
            language,
            fetcher,
            config.transcription_timeout(),
        )),
    };
    tracing::info!("Using transcription engine {}", transcriber.engine_name());

    let metadata = Arc::new(SourceMetadataResolver::new(
        YoutubeResolver::new(&config.app.yt_dlp_path, config.command_timeout()),
        DirectResolver::new(http),
    ));

    let git = GitCli::new(&session, &config.github.git_host, config.command_timeout());
    let gateway = RepositoryGateway::new(
        Arc::new(api),
        Arc::new(git),
        session,
        GatewaySettings {
            upstream: RepoRef::new(&config.github.upstream_owner, &config.github.upstream_repo),
            base_branch: config.github.base_branch.clone(),
            retry: config.retry_policy(),
        },
    );

    let pipeline = ContributionPipeline::new(
        transcriber,
        metadata,
        gateway,
        PipelineSettings {
            work_dir: config.work_dir()?,
            retry: config.retry_policy(),
        },
    );

    let cancel = pipeline.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current step");
            cancel.cancel();
        }
    });

    for request in &requests {
        println!(
            "Contributing {} to {} as branch {}",
            request.source,
            request.target_dir,
            style(request.branch_name()).cyan()
        );
    }

    let outcomes = pipeline.run_all(&requests).await;
    let mut failed = 0;
    for (request, outcome) in requests.iter().zip(outcomes) {
        match outcome {
            PipelineOutcome::Success(pr) => {
                println!("{} {}", style("Pull request:").green().bold(), pr.url);
            }
            PipelineOutcome::Failure(failure) => {
                failed += 1;
                eprintln!("{} {}: {}", style("Error:").red().bold(), request.source, failure);
                if let Some(artifact) = &failure.resume.artifact {
                    eprintln!("Transcript kept at {}", artifact.path.display());
                }
            }
        }
    }

    if requests.len() > 1 {
        println!("{} of {} contributions succeeded", requests.len() - failed, requests.len());
    }

    Ok(if failed == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

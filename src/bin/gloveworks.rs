#[macro_use]
extern crate log;

#[macro_use]
extern crate eyre;

use argh::FromArgs;
use env_logger::Env;
use std::f64::consts::PI;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use gloveworks::acquisition::Outcome;
use gloveworks::features::SpectralFeatures;
use gloveworks::sink::{Fanout, FileSink, LogSink, NoteSink};
use gloveworks::source::Generator;
use gloveworks::wire::Wire;
use gloveworks::{Accel, Acquisition, Config, SessionContext, StreamKind};

#[derive(FromArgs)]
/// Collect a GloveWorks session: epochs of motion or voice samples with spectral features.
struct Gloveworks {
    /// stream to collect: motion (gait) or audio (voice).
    #[argh(positional)]
    stream: StreamKind,

    /// configuration file.
    #[argh(option, short = 'c', default = "PathBuf::from(\"gloveworks.toml\")")]
    config: PathBuf,

    /// replay samples from file instead of generating them: CSV of x,y,z for motion, 16-bit
    /// little-endian PCM for audio.
    #[argh(option, short = 'i')]
    input: Option<PathBuf>,

    /// frequency of the generated sine (Hz).
    #[argh(option, short = 'f')]
    freq: Option<f64>,

    /// stop the session after this many milliseconds.
    #[argh(option)]
    stop_after: Option<u64>,

    /// store epochs below this directory (overrides `output` in the configuration).
    #[argh(option, short = 'o')]
    out: Option<PathBuf>,

    /// print every epoch as a JSON note on stdout.
    #[argh(switch, short = 'n')]
    note: bool,

    /// user id (overrides `user_id` in the configuration).
    #[argh(option, short = 'u')]
    user: Option<String>,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    env_logger::Builder::from_env(Env::default().default_filter_or("warn,gloveworks=debug"))
        .init();

    info!("gloveworks acquisition");
    let args: Gloveworks = argh::from_env();

    let config = if args.config.exists() {
        Config::from_path(&args.config)?
    } else {
        warn!("no configuration at {:?}, using defaults", args.config);
        Config::default()
    };

    match args.stream {
        StreamKind::Motion => {
            let rate = config.motion.sampling_rate;
            let source = match &args.input {
                Some(p) => Generator::replay(rate, read_motion(p)?),
                None => {
                    let f = args.freq.unwrap_or(2.0);
                    Generator::new(rate, move |i| {
                        let t = i as f64 / rate;
                        Some(Accel::new(0., 0., (9.81 + (2. * PI * f * t).sin()) as f32))
                    })
                }
            };

            collect(&config, &args, source).await
        }
        StreamKind::Audio => {
            let rate = config.audio.sampling_rate;
            let source = match &args.input {
                Some(p) => Generator::replay(rate, i16::decode(&std::fs::read(p)?)?),
                None => {
                    let f = args.freq.unwrap_or(220.0);
                    Generator::new(rate, move |i| {
                        let t = i as f64 / rate;
                        Some((0.5 * i16::MAX as f64 * (2. * PI * f * t).sin()) as i16)
                    })
                }
            };

            collect(&config, &args, source).await
        }
    }
}

fn read_motion(p: &Path) -> eyre::Result<Vec<Accel>> {
    info!("reading motion samples from: {:?}", p);

    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(p)?;

    let samples = rdr
        .deserialize()
        .collect::<Result<Vec<Accel>, _>>()?;

    ensure!(!samples.is_empty(), "no samples in {:?}", p);
    Ok(samples)
}

async fn collect<S: Wire>(
    config: &Config,
    args: &Gloveworks,
    source: Generator<S>,
) -> eyre::Result<()> {
    let kind = S::KIND;
    let stream = config.stream(kind).clone();
    stream.validate()?;

    let mut sinks = Fanout::new().with(LogSink);

    if args.note {
        sinks.push(Box::new(NoteSink));
    }

    let files = args
        .out
        .clone()
        .or_else(|| config.output.clone())
        .map(|root| Arc::new(FileSink::new(root)));

    if let Some(files) = &files {
        info!("storing epochs below: {:?}", files.root());
        sinks.push(Box::new(Arc::clone(files)));
    }

    let mut acq = Acquisition::new(
        stream,
        Arc::new(source),
        SpectralFeatures::for_kind(kind),
        Arc::new(sinks),
    );

    let user = args.user.clone().unwrap_or_else(|| config.user_id.clone());
    let ctx = SessionContext::new(user, config.share(kind));

    acq.start(ctx).await?;

    let stopper = acq.stopper();
    let stop_after = args.stop_after.map(Duration::from_millis);
    tokio::spawn(async move {
        match stop_after {
            Some(d) => {
                tokio::select! {
                    _ = tokio::time::sleep(d) => info!("stopping after {:?}", d),
                    _ = tokio::signal::ctrl_c() => info!("interrupted, stopping"),
                }
            }
            None => {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupted, stopping");
                } else {
                    return;
                }
            }
        }

        stopper.stop();
    });

    let report = acq.wait().await?;

    if let Some(files) = &files {
        files.flush().await;
    }

    {
        let s = acq.session();
        let s = s.read().await;
        for (epoch, f) in s.trend() {
            println!("epoch {}: dominant frequency {:.2} Hz", epoch, f);
        }
        debug!("display trace: {} points", s.display.len());
    }

    info!(
        "session {} for {}: {:?}, {} epochs, {} samples dropped",
        report.context.session_id,
        report.context.user_id,
        report.outcome,
        report.results.len(),
        report.dropped
    );

    match report.outcome {
        Outcome::Aborted(e) => Err(eyre!("session aborted: {}", e)),
        _ => Ok(()),
    }
}

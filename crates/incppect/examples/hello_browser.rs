//! Minimal incppect demo: a few live variables and a page that shows
//! them. With no arguments it serves an embedded demo page; pass an
//! http root to serve `index.html` from disk instead.
//!
//! ```text
//! cargo run --example hello_browser -- --port 3010 [http_root]
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use incppect::{view, Parameters, Server};
use tracing::info;
use tracing_subscriber::EnvFilter;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>incppect demo</title>
    <script src="incppect.js"></script>
</head>
<body>
    <h3>incppect demo</h3>
    <pre id="out"></pre>
    <script>
        incppect.render = function () {
            var lines = [
                'frame:    ' + this.get_uint32('demo.frame_count'),
                'uptime:   ' + this.get_float('demo.time_s').toFixed(2) + ' s',
                'message:  ' + this.get_str('demo.message'),
                'wave[0]:  ' + this.get_float('demo.wave[0]').toFixed(3),
                'wave[1]:  ' + this.get_float('demo.wave[1]').toFixed(3),
                'clients:  ' + this.get_uint32('incppect.nclients'),
                'tx:       ' + this.get_double('incppect.tx_total').toFixed(0) + ' bytes',
                'rx:       ' + this.get_double('incppect.rx_total').toFixed(0) + ' bytes',
            ];
            document.getElementById('out').textContent = lines.join('\n');
        };
        incppect.init();
    </script>
</body>
</html>
"#;

#[derive(Parser)]
#[command(name = "hello_browser", about = "incppect basics")]
struct Args {
    /// TCP listen port
    #[arg(short, long, default_value_t = 3010)]
    port: u16,

    /// Serve index.html from this directory instead of the embedded page
    http_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let mut params = Parameters {
        port: args.port,
        resources: vec![String::new(), "index.html".into()],
        ..Default::default()
    };

    let server = Arc::new(Server::new());

    match args.http_root {
        Some(root) => {
            if !root.join("index.html").exists() {
                eprintln!("Resource path '{}' does not exist.", root.display());
                std::process::exit(1);
            }
            params.http_root = root;
        }
        None => server.set_resource("index.html", INDEX_HTML),
    }

    let started = Instant::now();
    let frame_count = Arc::new(AtomicU32::new(0));

    {
        let frame_count = frame_count.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(16)).await;
                frame_count.fetch_add(1, Ordering::Relaxed);
            }
        });
    }

    server.var("demo.frame_count", move |_| {
        view::of(&frame_count.load(Ordering::Relaxed))
    });
    server.var("demo.time_s", move |_| {
        view::of(&started.elapsed().as_secs_f32())
    });
    server.var("demo.message", |_| view::of("hello browser"));
    server.var("demo.wave[%d]", move |idxs| {
        let phase = idxs.first().copied().unwrap_or(0) as f32;
        view::of(&(started.elapsed().as_secs_f32() + phase).sin())
    });

    server.set_handler(|client_id, event, payload| {
        info!(client = client_id, ?event, len = payload.len(), "client event");
    });

    info!("url: http://localhost:{}/", args.port);
    server.run(params).await;

    Ok(())
}

//! 命令行渲染：读取一份 JSON 渲染参数，输出一张图片（或场景 HTML）。
//!
//! 与 HTTP 服务共用同一套配置（config.toml + APP_* 环境变量），
//! 但允许 `geojsonfile` 指向本地文件或 `-`（标准输入）。

use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;

use staticmap_backend::AppConfig;
use staticmap_backend::features::render::{RenderOptions, RenderOrchestrator};
use staticmap_backend::features::session::ImageFormat;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 日志写到 stderr，stdout 留给图片字节
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "staticmap_backend=info".into()),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let args = Args::parse(std::env::args().skip(1).collect());
    if args.help {
        print_help();
        return Ok(());
    }

    let raw = match (&args.options_path, &args.options_json) {
        (Some(_), Some(_)) => return Err("--options 与 --json 只能二选一".into()),
        (Some(path), None) if path.as_os_str() == "-" => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
        (Some(path), None) => fs::read_to_string(path)?,
        (None, Some(json)) => json.clone(),
        (None, None) => "{}".to_string(),
    };
    let mut options: RenderOptions = serde_json::from_str(&raw)?;
    if args.html {
        options.render_to_html = Some(true);
    }
    if let Some(format) = args.format {
        options.format = Some(format);
    }
    if let Some(file) = args.geojsonfile {
        options.geojsonfile = Some(file);
    }

    let mut config = AppConfig::load()?;
    config.geojson.allow_local_files = true;

    let orchestrator = RenderOrchestrator::from_config(&config)?;
    let result = orchestrator.render(&options).await;
    orchestrator.shutdown().await;
    let output = result?;

    let bytes = output.into_bytes();
    match args.out_path {
        Some(path) => {
            fs::write(&path, &bytes)?;
            eprintln!("已写入: {} ({} bytes)", path.display(), bytes.len());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&bytes)?;
            stdout.flush()?;
        }
    }

    Ok(())
}

struct Args {
    help: bool,
    options_path: Option<PathBuf>,
    options_json: Option<String>,
    geojsonfile: Option<String>,
    format: Option<ImageFormat>,
    html: bool,
    out_path: Option<PathBuf>,
}

impl Args {
    fn parse(argv: Vec<String>) -> Self {
        let mut args = Self {
            help: false,
            options_path: None,
            options_json: None,
            geojsonfile: None,
            format: None,
            html: false,
            out_path: None,
        };

        let mut it = argv.into_iter();
        while let Some(a) = it.next() {
            match a.as_str() {
                "-h" | "--help" => args.help = true,
                "--options" => args.options_path = it.next().map(PathBuf::from),
                "--json" => args.options_json = it.next(),
                "--geojsonfile" => args.geojsonfile = it.next(),
                "--type" => {
                    args.format = it.next().and_then(|v| match v.as_str() {
                        "png" => Some(ImageFormat::Png),
                        "jpeg" | "jpg" => Some(ImageFormat::Jpeg),
                        "webp" => Some(ImageFormat::Webp),
                        _ => None,
                    });
                }
                "--html" => args.html = true,
                "-o" | "--out" => args.out_path = it.next().map(PathBuf::from),
                _ => {}
            }
        }

        args
    }
}

fn print_help() {
    println!(
        r#"render_once（单次渲染）

用法：
  cargo run --bin render_once -- --options request.json --out map.png
  cat request.json | cargo run --bin render_once -- --options - > map.png

常用参数：
  --options PATH|-        渲染参数 JSON 文件（`-` 表示标准输入）
  --json STRING           直接传入渲染参数 JSON
  --geojsonfile PATH|URL  覆盖 geojsonfile（允许本地文件；`-` 表示标准输入）
  --type png|jpeg|webp    覆盖输出格式
  --html                  只输出场景 HTML
  -o, --out PATH          写入到文件（否则 stdout）

会话后端通过 APP_SESSION__WEBDRIVER_URL 指定（默认 http://127.0.0.1:9515）。
"#
    );
}

use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::PostprocessConfig;
use crate::features::session::ImageFormat;

const OXIPNG_ARGS: &[&str] = &["-o0", "-s", "-"];
const JPEGTRAN_ARGS: &[&str] = &["-optimize", "-copy", "none"];

/// 外部图片压缩器（stdin 输入、stdout 输出）
#[derive(Debug, Clone)]
pub struct PostProcessor {
    oxipng_path: String,
    jpegtran_path: String,
}

impl PostProcessor {
    pub fn new(config: &PostprocessConfig) -> Self {
        Self {
            oxipng_path: config.oxipng_path.clone(),
            jpegtran_path: config.jpegtran_path.clone(),
        }
    }

    /// PNG → `oxipng -o0 -s -`，JPEG → `jpegtran -optimize -copy none`，其余格式不处理
    pub fn command_for(&self, format: ImageFormat) -> Option<(&str, &'static [&'static str])> {
        match format {
            ImageFormat::Png => Some((self.oxipng_path.as_str(), OXIPNG_ARGS)),
            ImageFormat::Jpeg => Some((self.jpegtran_path.as_str(), JPEGTRAN_ARGS)),
            ImageFormat::Webp => None,
        }
    }

    /// 失败时记录告警并返回原图
    pub async fn optimize(&self, image: Vec<u8>, format: ImageFormat) -> Vec<u8> {
        let Some((program, args)) = self.command_for(format) else {
            return image;
        };
        match pipe_through(program, args, &image).await {
            Ok(out) if !out.is_empty() => {
                tracing::debug!(program, before = image.len(), after = out.len(), "图片已优化");
                out
            }
            Ok(_) => {
                tracing::warn!(program, "压缩器输出为空，返回原图");
                image
            }
            Err(e) => {
                tracing::warn!(program, error = %e, "图片优化失败，返回原图");
                image
            }
        }
    }
}

async fn pipe_through(program: &str, args: &[&str], input: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| std::io::Error::other("stdin 不可用"))?;
    let data = input.to_vec();
    let writer = tokio::spawn(async move {
        let r = stdin.write_all(&data).await;
        drop(stdin);
        r
    });

    let output = child.wait_with_output().await?;
    writer.await.map_err(std::io::Error::other)??;

    if !output.status.success() {
        return Err(std::io::Error::other(format!(
            "{program} 退出码 {:?}: {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(output.stdout)
}

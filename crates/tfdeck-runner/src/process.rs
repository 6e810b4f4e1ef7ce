//! Terraformプロセスの実行
//!
//! stdout と stderr は同じOSパイプを共有するため、中継される出力は
//! terraform が書いた順序のままになる。

use crate::error::{Result, RunnerError};
use crate::stream::{LineSink, LineStream};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tfdeck_config::{PLUGIN_CACHE_DIR_ENV, Settings};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::unix::pipe;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// 呼び出しごとの環境変数(認証情報やリージョン)。他のすべてより優先
pub type ExtraEnv = HashMap<String, String>;

/// 対話的なヒントを抑えるため全プロセスに設定
pub const AUTOMATION_ENV: &str = "TF_IN_AUTOMATION";

/// バッファ実行の結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub success: bool,
    /// stdout と stderr を合わせたもの
    pub output: String,
}

impl CommandOutput {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
        }
    }
}

/// Spawns terraform with a fixed program path and base environment
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: PathBuf,
    base_env: BTreeMap<String, String>,
}

impl ProcessRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            base_env: BTreeMap::new(),
        }
    }

    /// 設定された terraform バイナリ用のランナー(プラグインキャッシュ共有)
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.terraform_bin)
            .with_env(
                PLUGIN_CACHE_DIR_ENV,
                settings.plugin_cache_dir.to_string_lossy(),
            )
            .with_env(AUTOMATION_ENV, "1")
    }

    /// ベース環境に変数を追加
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.base_env.insert(key.into(), value.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn base_env(&self) -> &BTreeMap<String, String> {
        &self.base_env
    }

    fn command(&self, args: &[String], cwd: &Path, extra_env: &ExtraEnv) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .current_dir(cwd)
            .envs(&self.base_env)
            .envs(extra_env)
            .stdin(Stdio::null());
        cmd
    }

    /// 出力を1行ずつ読めるプロセスを起動する
    ///
    /// tokio ランタイム内から呼ぶこと。
    pub fn spawn_lines(&self, args: &[String], cwd: &Path, extra_env: &ExtraEnv) -> Result<ProcessLines> {
        debug!(
            program = %self.program.display(),
            args = %args.join(" "),
            cwd = %cwd.display(),
            "Spawning process"
        );

        let (reader, writer) = std::io::pipe()?;
        let mut cmd = self.command(args, cwd, extra_env);
        cmd.stdout(writer.try_clone()?).stderr(writer);

        let child = cmd.spawn().map_err(|source| RunnerError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;
        // 書き込み側を Command が保持している間は EOF が来ない
        drop(cmd);

        let receiver = pipe::Receiver::from_owned_fd(OwnedFd::from(reader))?;
        Ok(ProcessLines {
            child,
            reader: BufReader::new(receiver),
            buf: Vec::new(),
        })
    }

    /// 終了まで実行し、出力をまとめて返す
    ///
    /// 起動・読み取りの失敗はエラーではなく出力に含める。
    pub async fn run(&self, args: &[String], cwd: &Path, extra_env: &ExtraEnv) -> CommandOutput {
        let mut lines = match self.spawn_lines(args, cwd, extra_env) {
            Ok(lines) => lines,
            Err(e) => {
                warn!(error = %e, "Failed to spawn terraform");
                return CommandOutput::failed(e.to_string());
            }
        };

        let mut output = String::new();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    output.push_str(&line);
                    output.push('\n');
                }
                Ok(None) => break,
                Err(e) => {
                    output.push_str(&format!("Error: {e}\n"));
                    break;
                }
            }
        }

        match lines.wait().await {
            Ok(success) => CommandOutput { success, output },
            Err(e) => {
                output.push_str(&format!("Error: {e}\n"));
                CommandOutput::failed(output)
            }
        }
    }

    /// プロセスの出力を `sink` に中継し、成功したかを返す
    ///
    /// 終了センチネルは送らない。ストリームの終わりは呼び出し側が決める。
    pub async fn relay(
        &self,
        sink: &LineSink,
        args: &[String],
        cwd: &Path,
        extra_env: &ExtraEnv,
    ) -> bool {
        let mut lines = match self.spawn_lines(args, cwd, extra_env) {
            Ok(lines) => lines,
            Err(e) => {
                warn!(error = %e, "Failed to spawn terraform");
                sink.send(format!("Error: {e}")).await;
                return false;
            }
        };

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => sink.send(line).await,
                Ok(None) => break,
                Err(e) => {
                    sink.send(format!("Error: {e}")).await;
                    break;
                }
            }
        }

        match lines.wait().await {
            Ok(success) => success,
            Err(e) => {
                sink.send(format!("Error: {e}")).await;
                false
            }
        }
    }

    /// 単一プロセスをストリーミングし、最後に終了センチネルを付ける
    pub fn stream(&self, args: Vec<String>, cwd: PathBuf, extra_env: ExtraEnv) -> LineStream {
        let runner = self.clone();
        LineStream::spawn(move |sink| async move {
            let success = runner.relay(&sink, &args, &cwd, &extra_env).await;
            sink.finish(success).await;
        })
    }
}

/// 実行中のプロセスと出力パイプの読み取り側
#[derive(Debug)]
pub struct ProcessLines {
    child: Child,
    reader: BufReader<pipe::Receiver>,
    buf: Vec<u8>,
}

impl ProcessLines {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// 改行を除いた次の出力行。出力の終わりで `None`
    ///
    /// 不正な UTF-8 は置換する。
    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        self.buf.clear();
        if self.reader.read_until(b'\n', &mut self.buf).await? == 0 {
            return Ok(None);
        }

        let mut line = String::from_utf8_lossy(&self.buf).into_owned();
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        Ok(Some(line))
    }

    /// 終了を待つ。終了コード0なら `true`
    ///
    /// 先に出力を最後まで読むこと。パイプが詰まるとプロセスが止まる。
    pub async fn wait(mut self) -> std::io::Result<bool> {
        let status = self.child.wait().await?;
        debug!(status = %status, "Process exited");
        Ok(status.success())
    }
}

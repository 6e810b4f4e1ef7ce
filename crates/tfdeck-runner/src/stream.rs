//! 行ストリーム
//!
//! [`LineStream`] はバックグラウンドタスクから [`LineSink`] 経由で供給される。
//! ストリームを drop してもタスクはキャンセルされない。

use crate::sentinel::{escape_output_line, exit_sentinel};
use futures_util::Stream;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// 生成側タスクと遅い利用側の間でバッファする行数
pub const STREAM_BUFFER: usize = 256;

/// 改行で終わる出力行。最後に終了センチネルが1行付く
#[derive(Debug)]
pub struct LineStream {
    rx: mpsc::Receiver<String>,
}

impl LineStream {
    /// `producer` をランタイム上で実行し、送られた行をストリームにする
    pub fn spawn<F, Fut>(producer: F) -> Self
    where
        F: FnOnce(LineSink) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(producer(LineSink { tx }));
        Self { rx }
    }

    /// 次の行。生成側が終わると `None`
    pub async fn next_line(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

impl Stream for LineStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// [`LineStream`] の生成側
#[derive(Debug)]
pub struct LineSink {
    tx: mpsc::Sender<String>,
}

impl LineSink {
    /// 1行送る。改行がなければ付ける
    ///
    /// 途中の改行で分割し、各行をエスケープする。
    /// 利用側が閉じていても無視し、生成側はプロセスを最後まで読み続ける。
    pub async fn send(&self, line: impl Into<String>) {
        let line = line.into();
        let text = line.strip_suffix('\n').unwrap_or(&line);
        for piece in text.split('\n') {
            let mut piece = escape_output_line(piece);
            piece.push('\n');
            let _ = self.tx.send(piece).await;
        }
    }

    /// 利用側がいなくなったか
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// 終了センチネルを送りストリームを閉じる
    pub async fn finish(self, success: bool) {
        let _ = self.tx.send(exit_sentinel(success)).await;
    }
}

//! tfdeck ランナー
//!
//! 発見したインスタンスに対して terraform を実行する。
//! 終了センチネル付きの plan/apply/destroy ストリーミング、リソース単位の
//! ロック、プロバイダーキャッシュのバックグラウンドウォームアップを扱う。
//! Unix専用(プロセス出力はOSパイプから読む)。

pub mod error;
pub mod locks;
pub mod orchestrator;
pub mod outputs;
pub mod process;
pub mod sentinel;
pub mod stream;
pub mod warmer;

pub use error::{Result, RunnerError};
pub use locks::{ResourceGuard, ResourceLock, ResourceLockRegistry};
pub use orchestrator::{Operation, Orchestrator, RunOptions};
pub use outputs::{OutputValue, parse_output_values};
pub use process::{CommandOutput, ExtraEnv, ProcessLines, ProcessRunner};
pub use sentinel::{EXIT_SENTINEL_PREFIX, escape_output_line, exit_sentinel, parse_exit_sentinel};
pub use stream::{LineSink, LineStream};
pub use warmer::{CacheState, CacheStatus, ProviderCacheWarmer, phase_for_line};

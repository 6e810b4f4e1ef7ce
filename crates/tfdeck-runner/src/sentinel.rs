//! 終了センチネル
//!
//! すべてのストリームは `__TF_EXIT__:<0|1>` 行1つで終わる。
//! 利用側はこの行からのみプロセスの結果を知る。

pub const EXIT_SENTINEL_PREFIX: &str = "__TF_EXIT__";

/// ストリームの最終行(改行込み)
pub fn exit_sentinel(success: bool) -> String {
    format!("{}:{}\n", EXIT_SENTINEL_PREFIX, if success { 0 } else { 1 })
}

/// `line` が正しいセンチネルなら `Some(success)`
pub fn parse_exit_sentinel(line: &str) -> Option<bool> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    match line.strip_prefix(EXIT_SENTINEL_PREFIX)? {
        ":0" => Some(true),
        ":1" => Some(false),
        _ => None,
    }
}

/// センチネルの接頭辞で始まる行は先頭に空白を1つ入れる
pub fn escape_output_line(line: &str) -> String {
    if line.starts_with(EXIT_SENTINEL_PREFIX) {
        format!(" {line}")
    } else {
        line.to_string()
    }
}

//! 判断本地文件是否需要上传
//!
//! 本地与远端的时钟被假定为同步的，精度取决于后端：FTP 列表通常只到秒，
//! 挂载共享则是文件系统本身的精度。不做时钟偏差补偿。

use crate::storage::RemoteTime;
use chrono::{DateTime, Utc};

/// 远端不存在（或时间未知），或本地严格新于远端时返回 true。
///
/// 时间相同不上传，重复运行不会重复传输未变化的文件。
pub fn is_newer(local: DateTime<Utc>, remote: RemoteTime) -> bool {
    match remote {
        None => true,
        Some(remote) => local > remote,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_absent_remote_is_stale() {
        assert!(is_newer(at(0), None));
        assert!(is_newer(at(1_700_000_000), None));
    }

    #[test]
    fn test_strictly_newer_only() {
        let cases = [
            (100, 200, false),
            (200, 100, true),
            (100, 100, false),
            (101, 100, true),
        ];
        for (local, remote, expected) in cases {
            assert_eq!(
                is_newer(at(local), Some(at(remote))),
                expected,
                "local={} remote={}",
                local,
                remote
            );
        }
    }

    #[test]
    fn test_subsecond_difference_counts() {
        let remote = at(100);
        let local = remote + chrono::Duration::milliseconds(1);
        assert!(is_newer(local, Some(remote)));
    }
}

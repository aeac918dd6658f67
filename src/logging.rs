//! 로깅 시스템
//!
//! 드라이버 전역 로깅 시스템을 제공합니다.
//! 출력 장치와 시간 소스는 [`LogSink`]로 주입되며, 설치되지 않은 경우
//! 로그는 메모리 링 버퍼에만 남습니다.

use core::fmt;
use spin::{Mutex, Once};

#[cfg(test)]
use alloc::string::String;
#[cfg(test)]
use alloc::vec::Vec;

/// 로그 레벨
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// 에러 레벨 (항상 출력)
    Error = 0,
    /// 경고 레벨
    Warn = 1,
    /// 정보 레벨
    Info = 2,
    /// 디버그 레벨
    Debug = 3,
    /// 트레이스 레벨 (가장 상세)
    Trace = 4,
}

impl LogLevel {
    fn label(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN ",
            LogLevel::Info => "INFO ",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

/// 현재 로그 레벨 (컴파일 타임에 설정 가능)
pub const LOG_LEVEL: LogLevel = LogLevel::Debug;

const RING_CAPACITY: usize = 256;
const MAX_LOG_LINE_LEN: usize = 128;

/// 로그 출력 대상
///
/// 보드 초기화 코드가 UART 콘솔과 시스템 타이머를 묶어 구현합니다.
pub trait LogSink: Sync {
    /// 한 줄 출력
    fn write_line(&self, level: LogLevel, timestamp_ms: u64, message: &str);

    /// 현재 시각 (밀리초)
    fn timestamp_ms(&self) -> u64 {
        0
    }
}

static SINK: Once<&'static dyn LogSink> = Once::new();

/// 로그 출력 대상 설치
///
/// 한 번만 설치되며 이후 호출은 무시됩니다.
pub fn init(sink: &'static dyn LogSink) {
    SINK.call_once(|| sink);
}

/// 구조화된 로그 엔트리
#[derive(Clone, Copy)]
struct LogEntry {
    timestamp_ms: u64,
    level: LogLevel,
    message: [u8; MAX_LOG_LINE_LEN],
    message_len: usize,
}

impl LogEntry {
    const fn new() -> Self {
        Self {
            timestamp_ms: 0,
            level: LogLevel::Info,
            message: [0; MAX_LOG_LINE_LEN],
            message_len: 0,
        }
    }

    fn set(&mut self, timestamp_ms: u64, level: LogLevel, msg: &str) {
        self.timestamp_ms = timestamp_ms;
        self.level = level;
        self.message_len = floor_char_boundary(msg, MAX_LOG_LINE_LEN);
        self.message[..self.message_len].copy_from_slice(&msg.as_bytes()[..self.message_len]);
    }

    fn message(&self) -> &str {
        core::str::from_utf8(&self.message[..self.message_len]).unwrap_or("")
    }
}

struct LogRing {
    entries: [LogEntry; RING_CAPACITY],
    head: usize,
    count: usize,
}

impl LogRing {
    const fn new() -> Self {
        Self {
            entries: [LogEntry::new(); RING_CAPACITY],
            head: 0,
            count: 0,
        }
    }

    fn push(&mut self, timestamp_ms: u64, level: LogLevel, msg: &str) {
        self.entries[self.head].set(timestamp_ms, level, msg);
        self.head = (self.head + 1) % RING_CAPACITY;
        if self.count < RING_CAPACITY {
            self.count += 1;
        }
    }

    fn for_each<F: FnMut(&LogEntry)>(&self, mut f: F) {
        let start = if self.count == RING_CAPACITY { self.head } else { 0 };
        for i in 0..self.count {
            f(&self.entries[(start + i) % RING_CAPACITY]);
        }
    }
}

static LOG_RING: Mutex<LogRing> = Mutex::new(LogRing::new());

/// 로그 출력 함수
pub fn log(level: LogLevel, args: fmt::Arguments) {
    if level > LOG_LEVEL {
        return;
    }

    let sink = SINK.get();
    let timestamp_ms = sink.map(|s| s.timestamp_ms()).unwrap_or(0);

    // 고정 크기 버퍼에 포맷팅 (할당 없음)
    let mut buf = [0u8; MAX_LOG_LINE_LEN];
    let mut line = LineBuffer { buf: &mut buf, pos: 0 };
    let _ = fmt::Write::write_fmt(&mut line, args);
    let len = line.pos;
    let msg = core::str::from_utf8(&buf[..len]).unwrap_or(level.label());

    if let Some(sink) = sink {
        sink.write_line(level, timestamp_ms, msg);
    }
    LOG_RING.lock().push(timestamp_ms, level, msg);
}

/// 잘리는 경우에도 UTF-8 경계를 지키는 길이
fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}

/// 임시 로그 버퍼 (포맷팅용)
struct LineBuffer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> fmt::Write for LineBuffer<'a> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let remaining = self.buf.len().saturating_sub(self.pos);
        let to_write = floor_char_boundary(s, remaining);
        if to_write > 0 {
            self.buf[self.pos..self.pos + to_write].copy_from_slice(&s.as_bytes()[..to_write]);
            self.pos += to_write;
        }
        Ok(())
    }
}

/// 최근 로그 덤프
pub fn dump_recent() {
    let Some(sink) = SINK.get() else { return };
    LOG_RING.lock().for_each(|entry| {
        sink.write_line(entry.level, entry.timestamp_ms, entry.message());
    });
}

/// 특정 레벨의 로그만 필터링하여 출력
pub fn dump_by_level(level: LogLevel) {
    let Some(sink) = SINK.get() else { return };
    LOG_RING.lock().for_each(|entry| {
        if entry.level == level {
            sink.write_line(entry.level, entry.timestamp_ms, entry.message());
        }
    });
}

/// 링 버퍼에 남은 특정 레벨 메시지
#[cfg(test)]
pub(crate) fn recent_messages(level: LogLevel) -> Vec<String> {
    let mut out = Vec::new();
    LOG_RING.lock().for_each(|entry| {
        if entry.level == level {
            out.push(String::from(entry.message()));
        }
    });
    out
}

/// 에러 레벨 로그 매크로
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::log($crate::logging::LogLevel::Error, format_args!($($arg)*));
    };
}

/// 경고 레벨 로그 매크로
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::log($crate::logging::LogLevel::Warn, format_args!($($arg)*));
    };
}

/// 정보 레벨 로그 매크로
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::log($crate::logging::LogLevel::Info, format_args!($($arg)*));
    };
}

/// 디버그 레벨 로그 매크로
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::log($crate::logging::LogLevel::Debug, format_args!($($arg)*));
    };
}

/// 트레이스 레벨 로그 매크로
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {
        $crate::logging::log($crate::logging::LogLevel::Trace, format_args!($($arg)*));
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_lines_are_truncated_on_char_boundary() {
        let text = "가".repeat(60);
        let end = floor_char_boundary(&text, MAX_LOG_LINE_LEN);
        assert!(end <= MAX_LOG_LINE_LEN);
        assert!(text.is_char_boundary(end));
    }

    #[test]
    fn ring_keeps_latest_entries() {
        let mut ring = LogRing::new();
        for i in 0..(RING_CAPACITY + 3) {
            let msg = alloc::format!("entry {}", i);
            ring.push(i as u64, LogLevel::Info, &msg);
        }
        let mut first = None;
        let mut seen = 0;
        ring.for_each(|e| {
            if first.is_none() {
                first = Some(e.timestamp_ms);
            }
            seen += 1;
        });
        assert_eq!(seen, RING_CAPACITY);
        assert_eq!(first, Some(3));
    }

    #[test]
    fn warnings_reach_the_ring() {
        crate::log_warn!("logging self-test {}", 42);
        assert!(recent_messages(LogLevel::Warn)
            .iter()
            .any(|m| m == "logging self-test 42"));
    }
}

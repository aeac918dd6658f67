//! 제한 시간이 있는 대기
//!
//! 하드웨어를 폴링하는 모든 루프와 태스크가 멈추는 모든 지점은
//! 마감 시각과 폴링 횟수 상한을 함께 가진 [`Deadline`]을 거칩니다.
//! 시계가 멈춰 있어도 폴링 횟수 상한 때문에 루프는 반드시 끝납니다.
//!
//! 하드웨어 레지스터를 기다릴 때는 [`wait_until`]/[`wait_for`]로 폴링하고,
//! 디스패처가 알려주는 조건을 기다릴 때는 [`wait_on`]으로 이벤트에서 잠듭니다.

use crate::drivers::platform::Platform;
use crate::kernel::event::Event;

/// 대기 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// 최대 대기 시간 (마이크로초)
    pub timeout_us: u64,
    /// 최대 폴링 횟수
    pub max_polls: u32,
}

impl WaitPolicy {
    pub const fn new(timeout_us: u64, max_polls: u32) -> Self {
        Self {
            timeout_us,
            max_polls,
        }
    }
}

/// 대기 시간 초과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedOut;

/// 진행 중인 대기의 마감
#[derive(Debug)]
pub struct Deadline {
    expires_at_us: u64,
    polls_left: u32,
}

impl Deadline {
    pub fn start<P: Platform + ?Sized>(platform: &P, policy: WaitPolicy) -> Self {
        Self {
            expires_at_us: platform.now_us().saturating_add(policy.timeout_us),
            polls_left: policy.max_polls,
        }
    }

    /// 한 번 양보하고, 마감이 지났으면 `TimedOut`
    pub fn poll<P: Platform + ?Sized>(&mut self, platform: &P) -> Result<(), TimedOut> {
        if self.polls_left == 0 || platform.now_us() >= self.expires_at_us {
            return Err(TimedOut);
        }
        self.polls_left -= 1;
        platform.relax();
        Ok(())
    }

    /// `event`의 세대가 `seen`에서 바뀔 때까지 잠듦 (마감이 지났으면 `TimedOut`)
    pub fn sleep<P: Platform + ?Sized>(&mut self, platform: &P, event: &Event, seen: u32) -> Result<(), TimedOut> {
        if self.polls_left == 0 || platform.now_us() >= self.expires_at_us {
            return Err(TimedOut);
        }
        self.polls_left -= 1;
        platform.wait_event(event, seen, self.expires_at_us);
        Ok(())
    }
}

/// 조건이 참이 될 때까지 대기
pub fn wait_until<P, F>(platform: &P, policy: WaitPolicy, mut ready: F) -> Result<(), TimedOut>
where
    P: Platform + ?Sized,
    F: FnMut() -> bool,
{
    wait_for(platform, policy, || ready().then_some(()))
}

/// 값이 준비될 때까지 대기
pub fn wait_for<P, T, F>(platform: &P, policy: WaitPolicy, mut poll: F) -> Result<T, TimedOut>
where
    P: Platform + ?Sized,
    F: FnMut() -> Option<T>,
{
    let mut deadline = Deadline::start(platform, policy);
    loop {
        if let Some(value) = poll() {
            return Ok(value);
        }
        deadline.poll(platform)?;
    }
}

/// 이벤트 신호를 기다리며 값이 준비될 때까지 대기
pub fn wait_on_for<P, T, F>(platform: &P, event: &Event, policy: WaitPolicy, mut poll: F) -> Result<T, TimedOut>
where
    P: Platform + ?Sized,
    F: FnMut() -> Option<T>,
{
    let mut deadline = Deadline::start(platform, policy);
    loop {
        let seen = event.generation();
        if let Some(value) = poll() {
            return Ok(value);
        }
        deadline.sleep(platform, event, seen)?;
    }
}

/// 이벤트 신호를 기다리며 조건이 참이 될 때까지 대기
pub fn wait_on<P, F>(platform: &P, event: &Event, policy: WaitPolicy, mut ready: F) -> Result<(), TimedOut>
where
    P: Platform + ?Sized,
    F: FnMut() -> bool,
{
    wait_on_for(platform, event, policy, || ready().then_some(()))
}

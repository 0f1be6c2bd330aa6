//! Watermark Tracker
//!
//! # Interview Q&A
//!
//! Q: 부분 실패 시 watermark를 어디까지 올리는가?
//! A: "첫 실패 직전의 해결된 위치"까지만
//!
//!    ```text
//!    scan [100, 200]
//!      120 ok   150 skip   180 FAIL   190 ok
//!                  ▲
//!                  └── new watermark = 150 (toBlock 200 아님)
//!    ```
//!
//!    - 실패가 없으면 스캔 상한(toBlock)까지 전진
//!    - 실패가 있으면 max(해결된 위치 < 첫 실패 위치)
//!    - 결과는 항상 max(기존 값, 계산 값) → 단조 증가
//!
//!    다음 실행은 watermark+1 부터 다시 스캔하므로 실패 이벤트는 재시도되고,
//!    190처럼 이미 성공한 이벤트는 멱등성 guard가 skip 처리한다.
//!
//! 블록 번호(yield 분배)와 rollup input index(notice relay) 모두 같은 규칙 사용.

/// 한 구간의 처리 결과 집계
#[derive(Debug, Default, Clone)]
pub struct BatchProgress {
    resolved: Vec<u64>,
    failed: Vec<u64>,
}

impl BatchProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// 성공 또는 의도된 skip
    pub fn record_resolved(&mut self, position: u64) {
        self.resolved.push(position);
    }

    pub fn record_failed(&mut self, position: u64) {
        self.failed.push(position);
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    /// 처리 순서와 무관하게 가장 낮은 실패 위치
    pub fn first_failure(&self) -> Option<u64> {
        self.failed.iter().copied().min()
    }

    /// 새 watermark 계산
    ///
    /// - `current`: 저장된 watermark (없으면 None)
    /// - `ceiling`: 이 구간이 모두 해결됐을 때 도달할 위치 (toBlock)
    pub fn next_watermark(&self, current: Option<u64>, ceiling: u64) -> Option<u64> {
        let candidate = match self.first_failure() {
            None => Some(ceiling),
            Some(failed_at) => self
                .resolved
                .iter()
                .copied()
                .filter(|position| *position < failed_at)
                .max(),
        };

        match (current, candidate) {
            (Some(current), Some(candidate)) => Some(current.max(candidate)),
            (current, candidate) => current.or(candidate),
        }
    }
}

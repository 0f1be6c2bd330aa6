//! Ledger Matcher
//!
//! 온체인 loanId(keccak256 해시) → off-chain 대출/풀 레코드 매핑.
//! 실행 시작 시 한 번의 쿼리로 전체를 로드하고 이후 조회는 메모리에서만 수행.

use std::collections::HashMap;

use anyhow::{Context, Result};

use crate::db::{IndexerRepository, LoanRecord};
use crate::types::LoanKey;

pub struct LedgerMatcher {
    loans: HashMap<LoanKey, LoanRecord>,
}

impl LedgerMatcher {
    /// ACTIVE / DISBURSED 대출 일괄 로드
    pub async fn load(repo: &dyn IndexerRepository) -> Result<Self> {
        let loans = repo
            .load_active_loans()
            .await
            .context("Failed to load active loans")?;

        tracing::debug!(count = loans.len(), "Loaded active loans for matching");
        Ok(Self::from_records(loans))
    }

    pub fn from_records(records: impl IntoIterator<Item = LoanRecord>) -> Self {
        let loans = records
            .into_iter()
            .map(|loan| (LoanKey::from_application_id(&loan.loan_application_id), loan))
            .collect();
        Self { loans }
    }

    /// 매칭 실패는 에러가 아님: 다른 배포의 대출이거나 이미 종료된 대출
    pub fn lookup(&self, loan_id: &LoanKey) -> Option<&LoanRecord> {
        self.loans.get(loan_id)
    }

    pub fn len(&self) -> usize {
        self.loans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loans.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock::MockRepository;

    fn record(id: &str, pool: &str) -> LoanRecord {
        LoanRecord {
            loan_application_id: id.to_string(),
            status: "ACTIVE".to_string(),
            pool_id: pool.to_string(),
            pool_contract_address: "0x00000000000000000000000000000000000000aa".to_string(),
        }
    }

    #[test]
    fn test_lookup_by_hashed_id() {
        let matcher = LedgerMatcher::from_records(vec![record("loan-1", "pool-a"), record("loan-2", "pool-b")]);

        let hit = matcher.lookup(&LoanKey::from_application_id("loan-2")).unwrap();
        assert_eq!(hit.pool_id, "pool-b");
        assert_eq!(matcher.len(), 2);
    }

    #[test]
    fn test_unknown_loan_is_none() {
        let matcher = LedgerMatcher::from_records(vec![record("loan-1", "pool-a")]);
        assert!(matcher.lookup(&LoanKey::from_application_id("other-deployment")).is_none());
    }

    #[tokio::test]
    async fn test_load_from_repository() {
        let repo = MockRepository::new().with_loan("loan-1", "pool-a");
        let matcher = LedgerMatcher::load(&repo).await.unwrap();
        assert!(!matcher.is_empty());
        assert!(matcher.lookup(&LoanKey::from_application_id("loan-1")).is_some());
    }
}

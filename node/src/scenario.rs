//! # Scenario Runner
//!
//! A scenario is a JSON document describing a pool, the vault behind it and
//! a list of steps. The runner builds an [`StvPool`] and an
//! [`InMemoryBacking`], executes each step at the scenario clock, replays
//! the resulting records into the backing and hands them to a sink.
//!
//! Steps the pool rejects are logged and skipped, or abort the run in
//! strict mode. A backing that can no longer follow the journal always
//! aborts.
//!
//! ```json
//! {
//!   "start": "2026-01-01T00:00:00Z",
//!   "admin": "admin",
//!   "genesis": { "holder": "admin", "assets": 1000000000000000000 },
//!   "steps": [
//!     { "deposit": { "sender": "alice", "assets": 1000000000000000000 } },
//!     { "advance": { "secs": 86400, "report": true } }
//!   ]
//! }
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn};

use stv_protocol::{
    AccountId, Capability, Genesis, InMemoryBacking, LedgerError, LedgerEvent, MintForm,
    PoolConfig, ShareRate, StvPool, VaultParameters,
};

const ETH: u128 = 1_000_000_000_000_000_000;

/// A capability handed out by the admin when the pool is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub account: AccountId,
    pub capability: Capability,
}

/// A complete scenario file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario clock at pool creation; also the first oracle report.
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub config: PoolConfig,
    pub admin: AccountId,
    pub genesis: Genesis,
    #[serde(default)]
    pub grants: Vec<Grant>,
    #[serde(default = "ShareRate::par")]
    pub share_rate: ShareRate,
    pub steps: Vec<Step>,
}

/// One scenario step.
///
/// Pool steps map one-to-one onto pool operations. `advance`, `report`,
/// `deploy`, `unwind` and `set_share_rate` only change the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Deposit {
        sender: AccountId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recipient: Option<AccountId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        referral: Option<AccountId>,
        assets: u128,
    },
    Transfer {
        from: AccountId,
        to: AccountId,
        stv: u128,
    },
    RequestWithdrawal {
        owner: AccountId,
        stv: u128,
        #[serde(default)]
        liability_shares: u128,
    },
    Finalize {
        caller: AccountId,
        max_requests: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gas_cost_coverage_recipient: Option<AccountId>,
    },
    Claim {
        caller: AccountId,
        request_id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recipient: Option<AccountId>,
    },
    SetGasCostCoverage {
        caller: AccountId,
        coverage: u128,
    },
    /// Oracle reward (positive) or slash (negative).
    Accrue {
        delta: i128,
    },
    Mint {
        account: AccountId,
        shares: u128,
        form: MintForm,
    },
    Burn {
        account: AccountId,
        tokens: u128,
        form: MintForm,
    },
    ForceRebalance {
        caller: AccountId,
        account: AccountId,
    },
    ForceRebalanceAndSocializeLoss {
        caller: AccountId,
        account: AccountId,
    },
    SyncVaultParameters(VaultParameters),
    SetMaxLossSocializationBp {
        caller: AccountId,
        bp: u128,
    },
    GrantRole {
        admin: AccountId,
        account: AccountId,
        capability: Capability,
    },
    RevokeRole {
        admin: AccountId,
        account: AccountId,
        capability: Capability,
    },
    SetAllowlisted {
        admin: AccountId,
        account: AccountId,
        allowed: bool,
    },
    Advance {
        secs: u32,
        #[serde(default)]
        report: bool,
    },
    /// Oracle report at the current scenario time.
    Report,
    Deploy {
        assets: u128,
    },
    Unwind {
        assets: u128,
    },
    SetShareRate(ShareRate),
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Deposit { .. } => "deposit",
            Step::Transfer { .. } => "transfer",
            Step::RequestWithdrawal { .. } => "request_withdrawal",
            Step::Finalize { .. } => "finalize",
            Step::Claim { .. } => "claim",
            Step::SetGasCostCoverage { .. } => "set_gas_cost_coverage",
            Step::Accrue { .. } => "accrue",
            Step::Mint { .. } => "mint",
            Step::Burn { .. } => "burn",
            Step::ForceRebalance { .. } => "force_rebalance",
            Step::ForceRebalanceAndSocializeLoss { .. } => "force_rebalance_and_socialize_loss",
            Step::SyncVaultParameters(_) => "sync_vault_parameters",
            Step::SetMaxLossSocializationBp { .. } => "set_max_loss_socialization_bp",
            Step::GrantRole { .. } => "grant_role",
            Step::RevokeRole { .. } => "revoke_role",
            Step::SetAllowlisted { .. } => "set_allowlisted",
            Step::Advance { .. } => "advance",
            Step::Report => "report",
            Step::Deploy { .. } => "deploy",
            Step::Unwind { .. } => "unwind",
            Step::SetShareRate(_) => "set_share_rate",
        }
    }
}

/// End state of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub applied: usize,
    pub rejected: usize,
    pub records: usize,
    pub total_supply: u128,
    pub total_assets: u128,
    pub last_request_id: u64,
    pub last_finalized_request_id: u64,
    pub locked_assets: u128,
    pub total_liability_shares: u128,
    pub liquid: u128,
    pub deployed: u128,
}

/// Pool, backing and clock of a scenario in progress.
pub struct Runner {
    pool: StvPool,
    backing: InMemoryBacking,
    now: DateTime<Utc>,
    records: usize,
}

impl Runner {
    /// Creates the pool and hands out the initial grants.
    pub fn new(scenario: &Scenario) -> Result<Self> {
        let mut pool = StvPool::new(
            scenario.config.clone(),
            scenario.admin.clone(),
            scenario.genesis.clone(),
        )
        .context("creating pool")?;
        for grant in &scenario.grants {
            pool.grant_role(&scenario.admin, &grant.account, grant.capability)
                .with_context(|| format!("granting {} to {}", grant.capability, grant.account))?;
        }

        Ok(Self {
            pool,
            backing: InMemoryBacking::new(scenario.start).with_share_rate(scenario.share_rate),
            now: scenario.start,
            records: 0,
        })
    }

    /// Executes `steps` in order, passing every record to `sink`.
    pub fn run<F>(&mut self, steps: &[Step], strict: bool, mut sink: F) -> Result<Summary>
    where
        F: FnMut(&LedgerEvent) -> Result<()>,
    {
        self.flush(&mut sink)?;

        let (mut applied, mut rejected) = (0, 0);
        for (index, step) in steps.iter().enumerate() {
            let span = info_span!("step", index, kind = step.name());
            let _enter = span.enter();

            match self.execute(step) {
                Ok(()) => applied += 1,
                Err(err) if strict => {
                    return Err(anyhow::Error::new(err)
                        .context(format!("step {index} ({}) rejected", step.name())));
                }
                Err(err) => {
                    warn!(error = %err, "step rejected");
                    rejected += 1;
                }
            }
            self.flush(&mut sink)?;
        }

        let summary = self.summary(applied, rejected);
        info!(
            applied,
            rejected,
            records = summary.records,
            total_assets = %summary.total_assets,
            "scenario complete"
        );
        Ok(summary)
    }

    /// Runs one step at the current scenario time.
    pub fn execute(&mut self, step: &Step) -> Result<(), LedgerError> {
        let snapshot = self.backing.snapshot(self.now);
        let pool = &mut self.pool;

        match step {
            Step::Deposit {
                sender,
                recipient,
                referral,
                assets,
            } => {
                let recipient = recipient.as_ref().unwrap_or(sender);
                pool.deposit(sender, recipient, referral.clone(), *assets, &snapshot)?;
            }
            Step::Transfer { from, to, stv } => {
                pool.transfer(from, to, *stv, &snapshot)?;
            }
            Step::RequestWithdrawal {
                owner,
                stv,
                liability_shares,
            } => {
                pool.request_withdrawal(owner, owner, *stv, *liability_shares, &snapshot)?;
            }
            Step::Finalize {
                caller,
                max_requests,
                gas_cost_coverage_recipient,
            } => {
                let recipient = gas_cost_coverage_recipient.as_ref().unwrap_or(caller);
                pool.finalize(caller, *max_requests, recipient, &snapshot)?;
            }
            Step::Claim {
                caller,
                request_id,
                recipient,
            } => {
                let recipient = recipient.as_ref().unwrap_or(caller);
                pool.claim_withdrawal(caller, *request_id, recipient)?;
            }
            Step::SetGasCostCoverage { caller, coverage } => {
                pool.set_gas_cost_coverage(caller, *coverage)?;
            }
            Step::Accrue { delta } => {
                pool.accrue_reward_or_slash(*delta)?;
            }
            Step::Mint {
                account,
                shares,
                form,
            } => {
                pool.mint_liability_shares(account, *shares, *form, &snapshot)?;
            }
            Step::Burn {
                account,
                tokens,
                form,
            } => {
                pool.burn_liability_shares(account, *tokens, *form, &snapshot)?;
            }
            Step::ForceRebalance { caller, account } => {
                pool.force_rebalance(caller, account, &snapshot)?;
            }
            Step::ForceRebalanceAndSocializeLoss { caller, account } => {
                pool.force_rebalance_and_socialize_loss(caller, account, &snapshot)?;
            }
            Step::SyncVaultParameters(vault) => {
                pool.sync_vault_parameters(*vault)?;
            }
            Step::SetMaxLossSocializationBp { caller, bp } => {
                pool.set_max_loss_socialization_bp(caller, *bp)?;
            }
            Step::GrantRole {
                admin,
                account,
                capability,
            } => {
                pool.grant_role(admin, account, *capability)?;
            }
            Step::RevokeRole {
                admin,
                account,
                capability,
            } => {
                pool.revoke_role(admin, account, *capability)?;
            }
            Step::SetAllowlisted {
                admin,
                account,
                allowed,
            } => {
                pool.set_allowlisted(admin, account, *allowed)?;
            }
            Step::Advance { secs, report } => {
                self.now += Duration::seconds(i64::from(*secs));
                if *report {
                    self.backing.report(self.now);
                }
            }
            Step::Report => self.backing.report(self.now),
            Step::Deploy { assets } => self.backing.deploy(*assets)?,
            Step::Unwind { assets } => self.backing.unwind(*assets)?,
            Step::SetShareRate(rate) => self.backing.set_share_rate(*rate),
        }
        Ok(())
    }

    /// Replays pending records into the backing, then hands them out.
    fn flush<F>(&mut self, sink: &mut F) -> Result<()>
    where
        F: FnMut(&LedgerEvent) -> Result<()>,
    {
        let events = self.pool.drain_events();
        self.backing
            .apply_all(&events)
            .context("backing can no longer follow the pool journal")?;
        for event in &events {
            sink(event)?;
        }
        self.records += events.len();
        Ok(())
    }

    fn summary(&self, applied: usize, rejected: usize) -> Summary {
        Summary {
            applied,
            rejected,
            records: self.records,
            total_supply: self.pool.total_supply(),
            total_assets: self.pool.total_assets(),
            last_request_id: self.pool.last_request_id(),
            last_finalized_request_id: self.pool.last_finalized_request_id(),
            locked_assets: self.pool.locked_assets(),
            total_liability_shares: self.pool.total_liability_shares(),
            liquid: self.backing.liquid(),
            deployed: self.backing.deployed(),
        }
    }
}

/// A starter scenario: two depositors leave through the queue, and on the
/// minting variant one of them is force-rebalanced after the liability
/// share rate climbs.
pub fn example(start: DateTime<Utc>, minting: bool) -> Scenario {
    let admin = AccountId::from("admin");
    let alice = AccountId::from("alice");
    let bob = AccountId::from("bob");
    let stv_per_eth = ETH * 1_000_000_000;

    let mut steps = vec![
        Step::Deposit {
            sender: alice.clone(),
            recipient: None,
            referral: None,
            assets: ETH,
        },
        Step::Deposit {
            sender: bob.clone(),
            recipient: None,
            referral: Some(alice.clone()),
            assets: 2 * ETH,
        },
    ];
    if minting {
        steps.push(Step::Mint {
            account: alice.clone(),
            shares: 4 * ETH / 10,
            form: MintForm::Unwrapped,
        });
    }
    steps.extend([
        Step::RequestWithdrawal {
            owner: alice.clone(),
            stv: stv_per_eth / 2,
            liability_shares: 0,
        },
        Step::RequestWithdrawal {
            owner: bob.clone(),
            stv: stv_per_eth,
            liability_shares: 0,
        },
        Step::Advance {
            secs: 24 * 60 * 60,
            report: true,
        },
        Step::Finalize {
            caller: admin.clone(),
            max_requests: 10,
            gas_cost_coverage_recipient: None,
        },
        Step::Claim {
            caller: alice.clone(),
            request_id: 1,
            recipient: None,
        },
        Step::Claim {
            caller: bob.clone(),
            request_id: 2,
            recipient: None,
        },
    ]);
    if minting {
        steps.extend([
            Step::SetShareRate(ShareRate {
                total_pooled_assets: 11,
                total_shares: 10,
            }),
            Step::ForceRebalance {
                caller: bob,
                account: alice,
            },
        ]);
    }
    steps.push(Step::Accrue {
        delta: (ETH / 10) as i128,
    });

    Scenario {
        start,
        config: if minting {
            PoolConfig::with_minting()
        } else {
            PoolConfig::default()
        },
        admin: admin.clone(),
        genesis: Genesis {
            holder: admin.clone(),
            assets: ETH,
        },
        grants: vec![Grant {
            account: admin,
            capability: Capability::Finalize,
        }],
        share_rate: ShareRate::par(),
        steps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn example(minting: bool) -> Scenario {
        super::example(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(), minting)
    }

    fn run(scenario: &Scenario, strict: bool) -> Result<(Summary, Vec<LedgerEvent>)> {
        let mut records = Vec::new();
        let mut runner = Runner::new(scenario)?;
        let summary = runner.run(&scenario.steps, strict, |event| {
            records.push(event.clone());
            Ok(())
        })?;
        Ok((summary, records))
    }

    #[test]
    fn example_runs_clean_on_both_variants() {
        for minting in [false, true] {
            let (summary, records) = run(&example(minting), true).unwrap();
            assert_eq!(summary.rejected, 0);
            assert_eq!(summary.records, records.len());
            assert_eq!(summary.last_finalized_request_id, 2);
            assert_eq!(summary.locked_assets, 0);
            assert_eq!(summary.liquid + summary.deployed, summary.total_assets);
        }
    }

    #[test]
    fn minting_example_rebalances_alice() {
        let (summary, records) = run(&example(true), true).unwrap();
        let rebalanced = records
            .iter()
            .find_map(|event| match event {
                LedgerEvent::LiabilitySharesRebalanced(rebalanced) => Some(rebalanced.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(rebalanced.account, AccountId::from("alice"));
        assert_eq!(rebalanced.assets, 2 * ETH / 10);
        // 0.4 minted at par, 0.2 worth settled at 1.1
        assert_eq!(
            summary.total_liability_shares,
            4 * ETH / 10 - 181_818_181_818_181_818
        );
    }

    #[test]
    fn scenario_survives_json() {
        let json = serde_json::to_string_pretty(&example(true)).unwrap();
        let parsed: Scenario = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.steps, example(true).steps);
        assert!(json.contains("\"request_withdrawal\""));
        assert!(json.contains("\"set_share_rate\""));
    }

    #[test]
    fn minimal_scenario_uses_defaults() {
        let parsed: Scenario = serde_json::from_str(
            r#"{
                "start": "2026-01-01T00:00:00Z",
                "admin": "admin",
                "genesis": { "holder": "admin", "assets": 1000000000000000000 },
                "steps": [
                    { "deposit": { "sender": "alice", "assets": 1000000000000000000 } },
                    "report"
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(parsed.config, PoolConfig::default());
        assert_eq!(parsed.share_rate, ShareRate::par());
        assert_eq!(parsed.steps[1], Step::Report);

        let (summary, _) = run(&parsed, true).unwrap();
        assert_eq!(summary.total_assets, 2 * ETH);
    }

    #[test]
    fn rejected_steps_are_skipped_unless_strict() {
        let mut scenario = example(false);
        // bob cannot finalize
        scenario.steps.insert(
            0,
            Step::Finalize {
                caller: AccountId::from("bob"),
                max_requests: 1,
                gas_cost_coverage_recipient: None,
            },
        );

        let (summary, _) = run(&scenario, false).unwrap();
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.applied, scenario.steps.len() - 1);

        let err = run(&scenario, true).unwrap_err();
        assert!(err.to_string().contains("step 0 (finalize)"));
    }

    #[test]
    fn illiquid_backing_blocks_finalization() {
        let mut scenario = example(false);
        let finalize_at = scenario
            .steps
            .iter()
            .position(|step| matches!(step, Step::Finalize { .. }))
            .unwrap();
        // 4 ETH liquid before finalization; leave 0.4, short of the first
        // request
        scenario.steps.insert(finalize_at, Step::Deploy { assets: 36 * ETH / 10 });

        let (summary, _) = run(&scenario, false).unwrap();
        // finalize and both claims fail
        assert_eq!(summary.rejected, 3);
        assert_eq!(summary.last_finalized_request_id, 0);
    }
}

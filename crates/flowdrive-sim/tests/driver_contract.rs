//! Driver contract tests: the cross-cutting guarantees every scenario
//! relies on -- started status, fail-fast activation, timer windows,
//! variable merging, start-before history, and message correlation.

use std::time::Duration;

use anyhow::Result;
use flowdrive_core::config::DriverConfig;
use flowdrive_core::driver::{DriverError, TestDriver};
use flowdrive_sim::SimEngine;
use flowdrive_sim::trace::init_test_tracing;
use flowdrive_types::instance::InstanceStatus;
use flowdrive_types::variables::variables;
use serde_json::json;

const NOTIFY: &str = r#"
process_id: NotifyProcess
elements:
  - id: Start
    type: start_event
    next: Task_Prepare
  - id: Task_Prepare
    type: service_task
    job_type: prepare
    next: Catch_Confirmation
  - id: Catch_Confirmation
    type: message_catch
    message_name: confirmed
    correlation_variable: orderId
    next: End
  - id: End
    type: end_event
"#;

const ESCALATION: &str = r#"
process_id: EscalationProcess
elements:
  - id: Start
    type: start_event
    next: Gateway_Wait
  - id: Gateway_Wait
    type: event_gateway
    branches:
      - trigger:
          type: message
          name: resolved
          correlation_variable: ticketId
        next: End
      - trigger:
          type: timer
          duration_secs: 604800
        next: UserTask_Escalate
  - id: UserTask_Escalate
    type: user_task
    next: End
  - id: End
    type: end_event
"#;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

fn contract_driver() -> TestDriver<SimEngine> {
    init_test_tracing();
    let config = DriverConfig::default().with_busy_timeout(Duration::from_millis(100));
    TestDriver::with_config(SimEngine::new(), config)
}

async fn notify_driver() -> Result<TestDriver<SimEngine>> {
    let driver = contract_driver();
    driver.deploy("notify.yaml", NOTIFY).await?;
    Ok(driver)
}

async fn escalation_driver() -> Result<TestDriver<SimEngine>> {
    let driver = contract_driver();
    driver.deploy("escalation.yaml", ESCALATION).await?;
    Ok(driver)
}

#[tokio::test]
async fn starting_an_instance_reports_started_before_anything_else() -> Result<()> {
    let driver = notify_driver().await?;

    let instance = driver
        .start_instance("NotifyProcess", variables([("orderId", json!("A-1"))]))
        .await?;
    driver
        .assert_that(&instance)
        .await?
        .is_started()
        .is_waiting_at_elements(&["Task_Prepare"]);

    Ok(())
}

#[tokio::test]
async fn activating_more_jobs_than_available_fails_fast() -> Result<()> {
    let driver = notify_driver().await?;

    driver
        .start_instance("NotifyProcess", variables([("orderId", json!("A-1"))]))
        .await?;

    let err = driver
        .complete_job("prepare", 2, variables([]))
        .await
        .unwrap_err();
    match err {
        DriverError::ActivationMismatch {
            job_type,
            expected,
            actual,
        } => {
            assert_eq!(job_type, "prepare");
            assert_eq!(expected, 2);
            assert_eq!(actual, 1);
        }
        other => panic!("expected activation mismatch, got {other}"),
    }

    Ok(())
}

#[tokio::test]
async fn timers_fire_within_the_window_and_not_before() -> Result<()> {
    let driver = escalation_driver().await?;

    let instance = driver
        .start_instance("EscalationProcess", variables([("ticketId", json!("T-1"))]))
        .await?;
    driver
        .assert_that(&instance)
        .await?
        .is_waiting_at_elements(&["Gateway_Wait"]);

    // Six days in: the seven-day timer must not have fired, which the
    // driver surfaces as a busy-wait timeout.
    let err = driver.advance_time(6 * DAY).await.unwrap_err();
    assert!(matches!(err, DriverError::Settle(_)));
    driver
        .assert_that(&instance)
        .await?
        .is_waiting_at_elements(&["Gateway_Wait"]);

    // One more day reaches the deadline.
    driver.advance_time(DAY).await?;
    driver
        .assert_that(&instance)
        .await?
        .has_passed_element("Gateway_Wait")
        .is_waiting_at_elements(&["UserTask_Escalate"]);

    Ok(())
}

#[tokio::test]
async fn completion_variables_merge_into_the_existing_scope() -> Result<()> {
    let driver = notify_driver().await?;

    let instance = driver
        .start_instance(
            "NotifyProcess",
            variables([("orderId", json!("A-1")), ("priority", json!("high"))]),
        )
        .await?;
    driver
        .complete_job("prepare", 1, variables([("prepared", json!(true))]))
        .await?;

    driver
        .assert_that(&instance)
        .await?
        .has_variable_with_value("priority", &json!("high"))
        .has_variable_with_value("prepared", &json!(true))
        .has_variable_with_value("orderId", &json!("A-1"));

    Ok(())
}

#[tokio::test]
async fn starting_before_an_element_skips_the_upstream_path() -> Result<()> {
    let driver = notify_driver().await?;

    let from_start = driver
        .start_instance("NotifyProcess", variables([("orderId", json!("A-1"))]))
        .await?;
    driver.complete_job("prepare", 1, variables([])).await?;
    driver
        .assert_that(&from_start)
        .await?
        .has_passed_element("Start")
        .has_passed_element("Task_Prepare")
        .is_waiting_at_elements(&["Catch_Confirmation"]);

    let mid_process = driver
        .start_instance_before(
            "NotifyProcess",
            variables([("orderId", json!("B-2"))]),
            "Catch_Confirmation",
        )
        .await?;
    driver
        .assert_that(&mid_process)
        .await?
        .has_not_passed_element("Start")
        .has_not_passed_element("Task_Prepare")
        .is_waiting_at_elements(&["Catch_Confirmation"]);

    Ok(())
}

#[tokio::test]
async fn messages_correlate_only_on_a_matching_key() -> Result<()> {
    let driver = notify_driver().await?;

    let instance = driver
        .start_instance_before(
            "NotifyProcess",
            variables([("orderId", json!("A-1"))]),
            "Catch_Confirmation",
        )
        .await?;

    // Wrong key: stays waiting.
    driver.publish_message("confirmed", "Z-9").await?;
    driver
        .assert_that(&instance)
        .await?
        .is_waiting_at_elements(&["Catch_Confirmation"]);

    // Right key, wrong message name: stays waiting.
    driver.publish_message("rejected", "A-1").await?;
    driver
        .assert_that(&instance)
        .await?
        .is_waiting_at_elements(&["Catch_Confirmation"]);

    // Matching name and key: unblocked and completed.
    driver.publish_message("confirmed", "A-1").await?;
    driver
        .assert_that(&instance)
        .await?
        .has_passed_element("Catch_Confirmation")
        .is_completed();

    Ok(())
}

#[tokio::test]
async fn a_malformed_gateway_condition_terminates_the_instance() -> Result<()> {
    init_test_tracing();
    let driver = TestDriver::new(SimEngine::new());
    driver
        .deploy(
            "broken.yaml",
            r#"
process_id: BrokenProcess
elements:
  - id: Start
    type: start_event
    next: Gateway_Bad
  - id: Gateway_Bad
    type: exclusive_gateway
    branches:
      - condition: "price >="
        next: End
    default: End
  - id: End
    type: end_event
"#,
        )
        .await?;

    let instance = driver
        .start_instance("BrokenProcess", variables([("price", json!(1))]))
        .await?;

    use flowdrive_core::client::EngineQuery;
    assert_eq!(
        driver.engine().instance_status(instance.key).await?,
        InstanceStatus::Terminated
    );

    Ok(())
}

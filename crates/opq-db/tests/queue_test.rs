//! Integration tests for the `queue_rows` Task Store query layer:
//! enqueue, ranking, claim compare-and-set, and status transitions.

use opq_db::models::{Operation, RowStatus};
use opq_db::queries::queue::{self, NewQueueRow};
use opq_test_utils::{create_test_db, drop_test_db};
use uuid::Uuid;

fn new_row(tenant: &str, sku: &str, service: &str, op: Operation) -> NewQueueRow {
    NewQueueRow {
        execution_instance_id: Uuid::new_v4(),
        event_instance_id: Uuid::new_v4(),
        tenant_id: tenant.to_owned(),
        product_sku: sku.to_owned(),
        service_name: service.to_owned(),
        operation: op,
    }
}

#[tokio::test]
async fn enqueue_inserts_pending_row_with_zero_retries() {
    let (pool, db_name) = create_test_db().await;

    let row = queue::enqueue(&pool, &new_row("t1", "A", "iam", Operation::Create))
        .await
        .unwrap();

    assert_eq!(row.status, RowStatus::Pending);
    assert_eq!(row.retry_count, 0);
    assert_eq!(row.tenant_id, "t1");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn rank_pending_orders_by_operation_then_insertion() {
    let (pool, db_name) = create_test_db().await;

    let update = queue::enqueue(&pool, &new_row("t1", "X", "iam", Operation::Update)).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let create = queue::enqueue(&pool, &new_row("t2", "X", "iam", Operation::Create)).await.unwrap();

    let ranked = queue::rank_pending(&pool, "iam", 10).await.unwrap();
    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0].id, create.id);
    assert_eq!(ranked[0].sku_rank, 1);
    assert_eq!(ranked[1].id, update.id);
    assert_eq!(ranked[1].sku_rank, 2);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn rank_pending_caps_candidates_per_sku() {
    let (pool, db_name) = create_test_db().await;

    for i in 0..5 {
        queue::enqueue(&pool, &new_row(&format!("t{i}"), "A", "iam", Operation::Create))
            .await
            .unwrap();
    }
    queue::enqueue(&pool, &new_row("tb", "B", "iam", Operation::Create)).await.unwrap();

    let ranked = queue::rank_pending(&pool, "iam", 2).await.unwrap();
    let a_count = ranked.iter().filter(|r| r.product_sku == "A").count();
    let b_count = ranked.iter().filter(|r| r.product_sku == "B").count();
    assert_eq!(a_count, 2, "SKU A capped at per_sku_limit despite 5 candidates");
    assert_eq!(b_count, 1);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn rank_pending_ignores_other_services() {
    let (pool, db_name) = create_test_db().await;

    queue::enqueue(&pool, &new_row("t1", "A", "iam", Operation::Create)).await.unwrap();
    queue::enqueue(&pool, &new_row("t1", "A", "iot", Operation::Create)).await.unwrap();

    let ranked = queue::rank_pending(&pool, "iam", 10).await.unwrap();
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].service_name, "iam");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn claim_is_compare_and_set_only_one_winner() {
    let (pool, db_name) = create_test_db().await;

    let row = queue::enqueue(&pool, &new_row("t1", "A", "iam", Operation::Create)).await.unwrap();

    let first = queue::claim(&pool, row.id).await.unwrap();
    let second = queue::claim(&pool, row.id).await.unwrap();

    assert!(first, "first claim should succeed");
    assert!(!second, "second claim should lose the compare-and-set");

    let settled = queue::get_row(&pool, row.id).await.unwrap().unwrap();
    assert_eq!(settled.status, RowStatus::InProgress);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn count_in_progress_and_list_tenants() {
    let (pool, db_name) = create_test_db().await;

    let r1 = queue::enqueue(&pool, &new_row("t1", "A", "iam", Operation::Create)).await.unwrap();
    let r2 = queue::enqueue(&pool, &new_row("t2", "B", "iam", Operation::Create)).await.unwrap();
    queue::enqueue(&pool, &new_row("t3", "C", "iam", Operation::Create)).await.unwrap();

    queue::claim(&pool, r1.id).await.unwrap();
    queue::claim(&pool, r2.id).await.unwrap();

    assert_eq!(queue::count_in_progress(&pool, "iam").await.unwrap(), 2);
    let mut tenants = queue::list_in_progress_tenants(&pool, "iam").await.unwrap();
    tenants.sort();
    assert_eq!(tenants, vec!["t1".to_owned(), "t2".to_owned()]);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn fail_increments_retry_count_and_dead_letter_transitions() {
    let (pool, db_name) = create_test_db().await;

    let row = queue::enqueue(&pool, &new_row("t1", "A", "iam", Operation::Create)).await.unwrap();
    queue::claim(&pool, row.id).await.unwrap();
    assert!(queue::fail(&pool, row.id).await.unwrap());

    let failed = queue::get_row(&pool, row.id).await.unwrap().unwrap();
    assert_eq!(failed.status, RowStatus::Failed);
    assert_eq!(failed.retry_count, 1);

    assert!(queue::dead_letter(&pool, row.id).await.unwrap());
    let dead = queue::get_row(&pool, row.id).await.unwrap().unwrap();
    assert_eq!(dead.status, RowStatus::DeadLettered);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn requeue_failed_returns_row_to_pending() {
    let (pool, db_name) = create_test_db().await;

    let row = queue::enqueue(&pool, &new_row("t1", "A", "iam", Operation::Create)).await.unwrap();
    queue::claim(&pool, row.id).await.unwrap();
    queue::fail(&pool, row.id).await.unwrap();

    assert!(queue::requeue_failed(&pool, row.id).await.unwrap());
    let requeued = queue::get_row(&pool, row.id).await.unwrap().unwrap();
    assert_eq!(requeued.status, RowStatus::Pending);
    assert_eq!(requeued.retry_count, 1, "requeue does not reset the retry counter");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn complete_and_cancel_transitions() {
    let (pool, db_name) = create_test_db().await;

    let r1 = queue::enqueue(&pool, &new_row("t1", "A", "iam", Operation::Create)).await.unwrap();
    let r2 = queue::enqueue(&pool, &new_row("t2", "B", "iam", Operation::Create)).await.unwrap();
    queue::claim(&pool, r1.id).await.unwrap();
    queue::claim(&pool, r2.id).await.unwrap();

    assert!(queue::complete(&pool, r1.id).await.unwrap());
    assert!(queue::cancel(&pool, r2.id).await.unwrap());

    assert_eq!(queue::get_row(&pool, r1.id).await.unwrap().unwrap().status, RowStatus::Completed);
    assert_eq!(queue::get_row(&pool, r2.id).await.unwrap().unwrap().status, RowStatus::Canceled);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn get_service_progress_counts_by_status() {
    let (pool, db_name) = create_test_db().await;

    let r1 = queue::enqueue(&pool, &new_row("t1", "A", "iam", Operation::Create)).await.unwrap();
    queue::enqueue(&pool, &new_row("t2", "B", "iam", Operation::Create)).await.unwrap();
    queue::claim(&pool, r1.id).await.unwrap();
    queue::complete(&pool, r1.id).await.unwrap();

    let progress = queue::get_service_progress(&pool, "iam").await.unwrap();
    assert_eq!(progress.completed, 1);
    assert_eq!(progress.pending, 1);
    assert_eq!(progress.total, 2);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn reset_orphaned_in_progress_moves_rows_to_failed() {
    let (pool, db_name) = create_test_db().await;

    let row = queue::enqueue(&pool, &new_row("t1", "A", "iam", Operation::Create)).await.unwrap();
    queue::claim(&pool, row.id).await.unwrap();

    let reset = queue::reset_orphaned_in_progress(&pool, "iam").await.unwrap();
    assert_eq!(reset.len(), 1);

    let after = queue::get_row(&pool, row.id).await.unwrap().unwrap();
    assert_eq!(after.status, RowStatus::Failed);
    assert_eq!(after.retry_count, 1);

    pool.close().await;
    drop_test_db(&db_name).await;
}

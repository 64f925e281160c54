mod support;

use assert_matches::assert_matches;
use report_sheets::error::{MissingKind, ReportError};
use report_sheets::model::{UploadId, UploadState, WindowRequest};
use report_sheets::tools::{self, ReportTypeParams, SheetWindowParams, UploadReportParams};
use support::{TestWorkspace, app_state_with_config, set_text, sheets_workbook, single_sheet};

fn upload(report_type: &str, file_name: &str, bytes: Vec<u8>) -> UploadReportParams {
    UploadReportParams {
        report_type: report_type.to_string(),
        original_file_name: file_name.to_string(),
        bytes,
    }
}

fn report(report_type: &str) -> ReportTypeParams {
    ReportTypeParams {
        report_type: report_type.to_string(),
    }
}

#[tokio::test]
async fn first_sheet_is_default_without_preferred_sheet() {
    let workspace = TestWorkspace::new();
    let state = workspace.app_state();

    let descriptor = tools::upload_report(
        state.clone(),
        upload(
            "meal-allowance",
            "meals-2024-03.xlsx",
            sheets_workbook(&["Summary", "Data", "Notes"]),
        ),
    )
    .await
    .expect("upload");

    assert_eq!(descriptor.id, UploadId::from("meal-allowance-000001"));
    assert_eq!(descriptor.sheet_names, vec!["Summary", "Data", "Notes"]);
    assert_eq!(descriptor.default_sheet, "Summary");
    assert_eq!(descriptor.original_file_name, "meals-2024-03.xlsx");
    assert!(workspace.workbook_path(&descriptor).is_file());

    let latest = tools::latest_upload(state, report("meal-allowance"))
        .await
        .expect("latest");
    assert_eq!(latest, descriptor);
}

#[tokio::test]
async fn preferred_sheet_wins_over_container_order() {
    let workspace = TestWorkspace::new();
    let state = workspace.app_state();

    let descriptor = tools::upload_report(
        state,
        upload(
            "payroll",
            "luong.xlsx",
            sheets_workbook(&["Bìa", "Bảng lương", "Ghi chú"]),
        ),
    )
    .await
    .expect("upload");
    assert_eq!(descriptor.default_sheet, "Bảng lương");
}

#[tokio::test]
async fn configured_preferred_sheet_overrides_builtin() {
    let workspace = TestWorkspace::new();
    let config = workspace.config_with(|config| {
        config
            .preferred_sheets
            .insert("meal-allowance".to_string(), "Data".to_string());
    });
    let state = app_state_with_config(config);

    let descriptor = tools::upload_report(
        state,
        upload("meal-allowance", "m.xlsx", sheets_workbook(&["Summary", "Data"])),
    )
    .await
    .expect("upload");
    assert_eq!(descriptor.default_sheet, "Data");
}

#[tokio::test]
async fn second_upload_replaces_latest_and_old_id_stays_readable() {
    let workspace = TestWorkspace::new();
    let state = workspace.app_state();

    let first = tools::upload_report(
        state.clone(),
        upload(
            "overtime",
            "march.xlsx",
            single_sheet("Data", |sheet| set_text(sheet, 0, 0, "march")),
        ),
    )
    .await
    .expect("first upload");
    let second = tools::upload_report(
        state.clone(),
        upload(
            "overtime",
            "april.xlsx",
            single_sheet("Data", |sheet| set_text(sheet, 0, 0, "april")),
        ),
    )
    .await
    .expect("second upload");

    assert_eq!(second.seq, first.seq + 1);
    let latest = tools::latest_upload(state.clone(), report("overtime"))
        .await
        .expect("latest");
    assert_eq!(latest.id, second.id);

    let old_window = tools::sheet_window(
        state.clone(),
        SheetWindowParams {
            upload_id: first.id.clone(),
            sheet: "Data".to_string(),
            window: WindowRequest::default(),
        },
    )
    .await
    .expect("old window");
    assert_eq!(old_window.rows[0][0].as_text(), "march");

    let history = tools::upload_history(state, report("overtime"))
        .await
        .expect("history");
    let ids: Vec<_> = history.uploads.iter().map(|u| u.id.clone()).collect();
    assert_eq!(ids, vec![second.id, first.id]);
}

#[tokio::test]
async fn history_limit_evicts_oldest_files() {
    let workspace = TestWorkspace::new();
    let state = app_state_with_config(workspace.config_with(|config| config.history_limit = 2));

    let mut descriptors = Vec::new();
    for month in ["jan", "feb", "mar"] {
        let descriptor = tools::upload_report(
            state.clone(),
            upload(
                "leave-balance",
                &format!("{month}.xlsx"),
                single_sheet("Data", |sheet| set_text(sheet, 0, 0, month)),
            ),
        )
        .await
        .expect("upload");
        descriptors.push(descriptor);
    }

    assert!(!workspace.workbook_path(&descriptors[0]).exists());
    assert!(workspace.workbook_path(&descriptors[1]).exists());
    assert!(workspace.workbook_path(&descriptors[2]).exists());

    let err = tools::describe_upload(
        state,
        tools::UploadParams {
            upload_id: descriptors[0].id.clone(),
        },
    )
    .await
    .unwrap_err();
    assert_matches!(
        err,
        ReportError::NotFound {
            kind: MissingKind::Upload,
            ..
        }
    );
}

#[tokio::test]
async fn non_workbook_bytes_are_parse_errors_and_keep_latest() {
    let workspace = TestWorkspace::new();
    let state = workspace.app_state();

    let good = tools::upload_report(
        state.clone(),
        upload("headcount", "ok.xlsx", sheets_workbook(&["Sheet"])),
    )
    .await
    .expect("upload");

    let err = tools::upload_report(
        state.clone(),
        upload("headcount", "notes.csv", b"name,gender\nAn,nam\n".to_vec()),
    )
    .await
    .unwrap_err();
    assert_matches!(err, ReportError::Parse(_));

    let mut truncated = sheets_workbook(&["Sheet"]);
    truncated.truncate(truncated.len() / 2);
    let err = tools::upload_report(state.clone(), upload("headcount", "cut.xlsx", truncated))
        .await
        .unwrap_err();
    assert_matches!(err, ReportError::Parse(_));

    let latest = tools::latest_upload(state, report("headcount"))
        .await
        .expect("latest");
    assert_eq!(latest.id, good.id);
}

#[tokio::test]
async fn unknown_report_type_and_missing_upload_are_not_found() {
    let workspace = TestWorkspace::new();
    let state = workspace.app_state();

    let err = tools::upload_report(
        state.clone(),
        upload("lunch-menu", "x.xlsx", sheets_workbook(&["Sheet"])),
    )
    .await
    .unwrap_err();
    assert_matches!(
        err,
        ReportError::NotFound {
            kind: MissingKind::ReportType,
            ..
        }
    );

    let err = tools::latest_upload(state.clone(), report("payroll"))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ReportError::NotFound {
            kind: MissingKind::Upload,
            ..
        }
    );

    let err = tools::sheet_window(
        state,
        SheetWindowParams {
            upload_id: UploadId::from("payroll-000042"),
            sheet: "Data".to_string(),
            window: WindowRequest::default(),
        },
    )
    .await
    .unwrap_err();
    assert_matches!(
        err,
        ReportError::NotFound {
            kind: MissingKind::Upload,
            ..
        }
    );
}

#[tokio::test]
async fn oversized_and_empty_uploads_are_rejected() {
    let workspace = TestWorkspace::new();
    let state = app_state_with_config(workspace.config_with(|config| config.max_upload_bytes = 1024));

    let big = sheets_workbook(&["Sheet"]);
    assert!(big.len() > 1024);
    let err = tools::upload_report(state.clone(), upload("payroll", "big.xlsx", big))
        .await
        .unwrap_err();
    assert_matches!(err, ReportError::PayloadTooLarge { limit: 1024 });

    let err = tools::upload_report(state, upload("payroll", "empty.xlsx", Vec::new()))
        .await
        .unwrap_err();
    assert_matches!(err, ReportError::InvalidRequest(_));
}

#[tokio::test]
async fn deleted_backing_file_is_reported_as_file_not_found() {
    let workspace = TestWorkspace::new();
    let state = workspace.app_state();

    let descriptor = tools::upload_report(
        state.clone(),
        upload("drug-inventory", "thuoc.xlsx", sheets_workbook(&["Tồn kho"])),
    )
    .await
    .expect("upload");
    std::fs::remove_file(workspace.workbook_path(&descriptor)).expect("remove file");

    let status = tools::report_status(state.clone()).await.expect("status");
    let entry = status
        .reports
        .iter()
        .find(|entry| entry.report_type == "drug-inventory")
        .expect("entry");
    assert_eq!(entry.state, UploadState::FileNotFound);
    assert_eq!(entry.upload.as_ref().map(|u| &u.id), Some(&descriptor.id));

    let untouched = status
        .reports
        .iter()
        .find(|entry| entry.report_type == "payroll")
        .expect("entry");
    assert_eq!(untouched.state, UploadState::NoUpload);
    assert!(untouched.upload.is_none());

    // the parsed copy is still cached, but the window must not outlive the file
    let err = tools::sheet_window(
        state,
        SheetWindowParams {
            upload_id: descriptor.id.clone(),
            sheet: "Tồn kho".to_string(),
            window: WindowRequest::default(),
        },
    )
    .await
    .unwrap_err();
    assert_matches!(err, ReportError::FileNotFound { .. });
}

#[tokio::test]
async fn restart_restores_latest_and_continues_sequence() {
    let workspace = TestWorkspace::new();
    let first_state = workspace.app_state();
    let first = tools::upload_report(
        first_state.clone(),
        upload("social-insurance", "bhxh.xlsx", sheets_workbook(&["BHXH", "Data"])),
    )
    .await
    .expect("upload");
    drop(first_state);

    let state = workspace.app_state();
    let latest = tools::latest_upload(state.clone(), report("social-insurance"))
        .await
        .expect("restored latest");
    assert_eq!(latest, first);

    let window = tools::sheet_window(
        state.clone(),
        SheetWindowParams {
            upload_id: first.id.clone(),
            sheet: "Data".to_string(),
            window: WindowRequest::default(),
        },
    )
    .await
    .expect("window from disk");
    assert_eq!(window.rows[0][0].as_text(), "Data");

    let next = tools::upload_report(
        state,
        upload("social-insurance", "bhxh-2.xlsx", sheets_workbook(&["BHXH"])),
    )
    .await
    .expect("upload after restart");
    assert_eq!(next.seq, first.seq + 1);
}

#[tokio::test]
async fn status_lists_every_report_type_in_catalog_order() {
    let workspace = TestWorkspace::new();
    let state = workspace.app_state();
    tools::upload_report(
        state.clone(),
        upload("attendance-count", "cc.xlsx", sheets_workbook(&["Chấm công"])),
    )
    .await
    .expect("upload");

    let catalog = tools::list_reports(state.clone()).await.expect("catalog");
    let status = tools::report_status(state).await.expect("status");
    let catalog_keys: Vec<_> = catalog.reports.iter().map(|r| r.key.as_str()).collect();
    let status_keys: Vec<_> = status.reports.iter().map(|r| r.report_type.as_str()).collect();
    assert_eq!(catalog_keys, status_keys);
    assert_eq!(catalog_keys.len(), 12);

    let available: Vec<_> = status
        .reports
        .iter()
        .filter(|entry| entry.state == UploadState::Available)
        .map(|entry| entry.report_type.as_str())
        .collect();
    assert_eq!(available, vec!["attendance-count"]);
}

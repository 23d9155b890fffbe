use crate::db;
use crate::engine::{self, AssessmentItem, StudentAggregate};
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    bands_to_json, load_threshold_set, param_str, require_db, require_section, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;

fn load_items(conn: &Connection, section_id: &str) -> Result<Vec<AssessmentItem>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, title, max_score
             FROM assessment_items
             WHERE section_id = ?
             ORDER BY idx",
        )
        .map_err(HandlerErr::db_query)?;
    stmt.query_map([section_id], |r| {
        Ok(AssessmentItem {
            id: r.get(0)?,
            title: r.get(1)?,
            max_score: r.get(2)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db_query)
}

fn load_roster(conn: &Connection, section_id: &str) -> Result<Vec<String>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id FROM students WHERE section_id = ? ORDER BY sort_order")
        .map_err(HandlerErr::db_query)?;
    stmt.query_map([section_id], |r| r.get(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)
}

/// Saved raw values for a whole section, keyed student -> item -> value.
fn load_scores(
    conn: &Connection,
    section_id: &str,
) -> Result<HashMap<String, HashMap<String, f64>>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT s.student_id, s.item_id, s.raw_value
             FROM scores s
             JOIN assessment_items a ON a.id = s.item_id
             WHERE a.section_id = ?",
        )
        .map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map([section_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, f64>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let mut by_student: HashMap<String, HashMap<String, f64>> = HashMap::new();
    for (student_id, item_id, raw) in rows {
        by_student.entry(student_id).or_default().insert(item_id, raw);
    }
    Ok(by_student)
}

fn aggregates_to_json(aggregates: &[StudentAggregate]) -> serde_json::Value {
    json!(aggregates
        .iter()
        .map(|a| json!({
            "studentId": a.student_id,
            "totalScore": a.total_score,
            "maxPossible": a.max_possible,
            "percentage": a.percentage,
            "grade": a.grade,
        }))
        .collect::<Vec<_>>())
}

/// Full recompute for one section: validate the threshold set once, roll up
/// and classify every student against it, then replace the stored derived
/// rows wholesale. Never patches previous results incrementally.
fn handle_grades_compute(state: &mut AppState, req: &Request) -> serde_json::Value {
    let inner = || -> Result<serde_json::Value, HandlerErr> {
        let conn = require_db(state)?;
        let section_id = param_str(&req.params, "sectionId")?;
        require_section(conn, &section_id)?;

        let (thresholds, _source) = load_threshold_set(conn, &section_id)?;
        let items = load_items(conn, &section_id)?;
        let roster = load_roster(conn, &section_id)?;
        let scores = load_scores(conn, &section_id)?;

        let empty: HashMap<String, f64> = HashMap::new();
        let mut aggregates: Vec<StudentAggregate> = Vec::with_capacity(roster.len());
        for student_id in &roster {
            let raw_by_item = scores.get(student_id).unwrap_or(&empty);
            let mut agg = engine::aggregate_student(student_id, &items, raw_by_item);
            agg.grade = thresholds.classify(agg.percentage).to_string();
            aggregates.push(agg);
        }

        let distribution = engine::summarize(&aggregates, &thresholds);

        let tx = conn.unchecked_transaction().map_err(HandlerErr::db_query)?;
        tx.execute(
            "DELETE FROM student_grades WHERE section_id = ?",
            [&section_id],
        )
        .map_err(HandlerErr::db_query)?;
        let now = db::now_rfc3339();
        for agg in &aggregates {
            tx.execute(
                "INSERT INTO student_grades(
                    section_id, student_id, total_score, max_possible,
                    percentage, grade, computed_at
                 ) VALUES(?, ?, ?, ?, ?, ?, ?)",
                (
                    &section_id,
                    &agg.student_id,
                    agg.total_score,
                    agg.max_possible,
                    agg.percentage,
                    &agg.grade,
                    &now,
                ),
            )
            .map_err(HandlerErr::db_query)?;
        }
        tx.commit().map_err(HandlerErr::db_query)?;

        tracing::info!(
            section = %section_id,
            students = aggregates.len(),
            average = distribution.average_percentage,
            "grades recomputed"
        );

        Ok(json!({
            "sectionId": section_id,
            "students": aggregates_to_json(&aggregates),
            "distribution": distribution,
            "thresholds": bands_to_json(&thresholds),
        }))
    };

    match inner() {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

/// Report the last computed results. The distribution is re-reduced from the
/// stored rows without re-running classification.
fn handle_grades_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let inner = || -> Result<serde_json::Value, HandlerErr> {
        let conn = require_db(state)?;
        let section_id = param_str(&req.params, "sectionId")?;
        require_section(conn, &section_id)?;

        let (thresholds, _source) = load_threshold_set(conn, &section_id)?;

        let mut stmt = conn
            .prepare(
                "SELECT g.student_id, g.total_score, g.max_possible, g.percentage, g.grade
                 FROM student_grades g
                 JOIN students st ON st.id = g.student_id
                 WHERE g.section_id = ?
                 ORDER BY st.sort_order",
            )
            .map_err(HandlerErr::db_query)?;
        let aggregates: Vec<StudentAggregate> = stmt
            .query_map([&section_id], |r| {
                Ok(StudentAggregate {
                    student_id: r.get(0)?,
                    total_score: r.get(1)?,
                    max_possible: r.get(2)?,
                    percentage: r.get(3)?,
                    grade: r.get(4)?,
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db_query)?;

        let distribution = engine::summarize(&aggregates, &thresholds);

        Ok(json!({
            "sectionId": section_id,
            "students": aggregates_to_json(&aggregates),
            "distribution": distribution,
            "thresholds": bands_to_json(&thresholds),
        }))
    };

    match inner() {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.compute" => Some(handle_grades_compute(state, req)),
        "grades.summary" => Some(handle_grades_summary(state, req)),
        _ => None,
    }
}

use crate::model::{
    AcademicYear, AssessmentComponent, Dataset, GradeLevel, Student, StudentScore, Subject, Trimester,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;

pub const DB_FILE_NAME: &str = "gradebook.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let conn = Connection::open(workspace.join(DB_FILE_NAME))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_levels(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_years(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            name TEXT NOT NULL,
            start_year INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS trimesters(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            academic_year_id TEXT NOT NULL,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(academic_year_id) REFERENCES academic_years(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            name TEXT NOT NULL,
            grade_level_id TEXT NOT NULL,
            academic_year_id TEXT NOT NULL,
            trimester_id TEXT NOT NULL,
            FOREIGN KEY(grade_level_id) REFERENCES grade_levels(id),
            FOREIGN KEY(academic_year_id) REFERENCES academic_years(id),
            FOREIGN KEY(trimester_id) REFERENCES trimesters(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_teacher ON subjects(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assessment_components(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            name TEXT NOT NULL,
            weight REAL NOT NULL DEFAULT 0,
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_components_subject ON assessment_components(subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            grade_level_id TEXT NOT NULL,
            FOREIGN KEY(grade_level_id) REFERENCES grade_levels(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_teacher ON students(teacher_id)",
        [],
    )?;

    // Final scores and ranks are derived on read; only raw inputs are stored here.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_scores(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            exam_score REAL,
            class_assessment_scores TEXT NOT NULL DEFAULT '{}',
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            UNIQUE(student_id, subject_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scores_subject ON student_scores(subject_id)",
        [],
    )?;

    ensure_scores_updated_at(&conn)?;

    Ok(conn)
}

fn ensure_scores_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "student_scores", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE student_scores ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value_json FROM settings WHERE key = ?", [key], |r| r.get(0))
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        params![key, serde_json::to_string(value)?],
    )?;
    Ok(())
}

/// Rows are scoped by owner; an id already owned by another teacher is left alone and
/// the upsert reports 0 rows written.
pub fn upsert_grade_level(conn: &Connection, teacher_id: &str, g: &GradeLevel) -> anyhow::Result<usize> {
    let rows = conn.execute(
        "INSERT INTO grade_levels(id, teacher_id, name, sort_order) VALUES(?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name, sort_order = excluded.sort_order
         WHERE grade_levels.teacher_id = excluded.teacher_id",
        params![&g.id, teacher_id, &g.name, g.sort_order],
    )?;
    Ok(rows)
}

pub fn upsert_academic_year(conn: &Connection, teacher_id: &str, y: &AcademicYear) -> anyhow::Result<usize> {
    let rows = conn.execute(
        "INSERT INTO academic_years(id, teacher_id, name, start_year) VALUES(?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name, start_year = excluded.start_year
         WHERE academic_years.teacher_id = excluded.teacher_id",
        params![&y.id, teacher_id, &y.name, y.start_year],
    )?;
    Ok(rows)
}

pub fn upsert_trimester(conn: &Connection, teacher_id: &str, t: &Trimester) -> anyhow::Result<usize> {
    let rows = conn.execute(
        "INSERT INTO trimesters(id, teacher_id, academic_year_id, name, sort_order) VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            academic_year_id = excluded.academic_year_id,
            name = excluded.name,
            sort_order = excluded.sort_order
         WHERE trimesters.teacher_id = excluded.teacher_id",
        params![&t.id, teacher_id, &t.academic_year_id, &t.name, t.sort_order],
    )?;
    Ok(rows)
}

pub fn upsert_subject(conn: &Connection, teacher_id: &str, s: &Subject) -> anyhow::Result<usize> {
    let rows = conn.execute(
        "INSERT INTO subjects(id, teacher_id, name, grade_level_id, academic_year_id, trimester_id)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            grade_level_id = excluded.grade_level_id,
            academic_year_id = excluded.academic_year_id,
            trimester_id = excluded.trimester_id
         WHERE subjects.teacher_id = excluded.teacher_id",
        params![
            &s.id,
            teacher_id,
            &s.name,
            &s.grade_level_id,
            &s.academic_year_id,
            &s.trimester_id,
        ],
    )?;
    Ok(rows)
}

pub fn upsert_component(conn: &Connection, teacher_id: &str, c: &AssessmentComponent) -> anyhow::Result<usize> {
    let rows = conn.execute(
        "INSERT INTO assessment_components(id, teacher_id, subject_id, name, weight) VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            subject_id = excluded.subject_id,
            name = excluded.name,
            weight = excluded.weight
         WHERE assessment_components.teacher_id = excluded.teacher_id",
        params![&c.id, teacher_id, &c.subject_id, &c.name, c.weight],
    )?;
    Ok(rows)
}

/// Subject the component is attached to right now, if `teacher_id` owns it.
pub fn component_subject(conn: &Connection, teacher_id: &str, component_id: &str) -> anyhow::Result<Option<String>> {
    let subject_id = conn
        .query_row(
            "SELECT subject_id FROM assessment_components WHERE id = ? AND teacher_id = ?",
            params![component_id, teacher_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(subject_id)
}

/// Returns the subject the deleted component belonged to.
pub fn delete_component(conn: &Connection, teacher_id: &str, component_id: &str) -> anyhow::Result<Option<String>> {
    let subject_id = component_subject(conn, teacher_id, component_id)?;
    if subject_id.is_some() {
        conn.execute(
            "DELETE FROM assessment_components WHERE id = ? AND teacher_id = ?",
            params![component_id, teacher_id],
        )?;
    }
    Ok(subject_id)
}

pub fn upsert_student(conn: &Connection, teacher_id: &str, s: &Student) -> anyhow::Result<usize> {
    let rows = conn.execute(
        "INSERT INTO students(id, teacher_id, first_name, last_name, grade_level_id) VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            first_name = excluded.first_name,
            last_name = excluded.last_name,
            grade_level_id = excluded.grade_level_id
         WHERE students.teacher_id = excluded.teacher_id",
        params![&s.id, teacher_id, &s.first_name, &s.last_name, &s.grade_level_id],
    )?;
    Ok(rows)
}

/// One record per (student, subject offering); a second write for the same pair
/// replaces the first.
pub fn upsert_score(conn: &Connection, teacher_id: &str, s: &StudentScore) -> anyhow::Result<usize> {
    let now = chrono::Utc::now().to_rfc3339();
    let rows = conn.execute(
        "INSERT INTO student_scores(id, teacher_id, student_id, subject_id, exam_score, class_assessment_scores, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject_id) DO UPDATE SET
            exam_score = excluded.exam_score,
            class_assessment_scores = excluded.class_assessment_scores,
            updated_at = excluded.updated_at
         WHERE student_scores.teacher_id = excluded.teacher_id",
        params![
            &s.id,
            teacher_id,
            &s.student_id,
            &s.subject_id,
            s.exam_score,
            serde_json::to_string(&s.class_assessment_scores)?,
            now,
        ],
    )?;
    Ok(rows)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owned {
    GradeLevel,
    AcademicYear,
    Trimester,
    Subject,
    Component,
    Student,
    Score,
}

impl Owned {
    fn table(self) -> &'static str {
        match self {
            Owned::GradeLevel => "grade_levels",
            Owned::AcademicYear => "academic_years",
            Owned::Trimester => "trimesters",
            Owned::Subject => "subjects",
            Owned::Component => "assessment_components",
            Owned::Student => "students",
            Owned::Score => "student_scores",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Owned::GradeLevel => "grade level",
            Owned::AcademicYear => "academic year",
            Owned::Trimester => "trimester",
            Owned::Subject => "subject",
            Owned::Component => "component",
            Owned::Student => "student",
            Owned::Score => "score",
        }
    }
}

/// Teacher that owns the row with this id, if any.
pub fn owner_of(conn: &Connection, kind: Owned, id: &str) -> anyhow::Result<Option<String>> {
    let sql = format!("SELECT teacher_id FROM {} WHERE id = ?", kind.table());
    let owner = conn.query_row(&sql, [id], |r| r.get(0)).optional()?;
    Ok(owner)
}

pub fn owns_subject(conn: &Connection, teacher_id: &str, subject_id: &str) -> anyhow::Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM subjects WHERE id = ? AND teacher_id = ?",
            params![subject_id, teacher_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn owns_student(conn: &Connection, teacher_id: &str, student_id: &str) -> anyhow::Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE id = ? AND teacher_id = ?",
            params![student_id, teacher_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn load_grade_levels(conn: &Connection, teacher_id: &str) -> anyhow::Result<Vec<GradeLevel>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, sort_order FROM grade_levels WHERE teacher_id = ? ORDER BY sort_order, id",
    )?;
    let rows = stmt
        .query_map([teacher_id], |r| {
            Ok(GradeLevel {
                id: r.get(0)?,
                name: r.get(1)?,
                sort_order: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn load_academic_years(conn: &Connection, teacher_id: &str) -> anyhow::Result<Vec<AcademicYear>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, start_year FROM academic_years WHERE teacher_id = ? ORDER BY start_year, id",
    )?;
    let rows = stmt
        .query_map([teacher_id], |r| {
            Ok(AcademicYear {
                id: r.get(0)?,
                name: r.get(1)?,
                start_year: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn load_trimesters(conn: &Connection, teacher_id: &str) -> anyhow::Result<Vec<Trimester>> {
    let mut stmt = conn.prepare(
        "SELECT id, academic_year_id, name, sort_order FROM trimesters WHERE teacher_id = ? ORDER BY sort_order, id",
    )?;
    let rows = stmt
        .query_map([teacher_id], |r| {
            Ok(Trimester {
                id: r.get(0)?,
                academic_year_id: r.get(1)?,
                name: r.get(2)?,
                sort_order: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn load_subjects(conn: &Connection, teacher_id: &str) -> anyhow::Result<Vec<Subject>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, grade_level_id, academic_year_id, trimester_id
         FROM subjects WHERE teacher_id = ? ORDER BY name, id",
    )?;
    let rows = stmt
        .query_map([teacher_id], |r| {
            Ok(Subject {
                id: r.get(0)?,
                name: r.get(1)?,
                grade_level_id: r.get(2)?,
                academic_year_id: r.get(3)?,
                trimester_id: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn load_components(
    conn: &Connection,
    teacher_id: &str,
    subject_id: Option<&str>,
) -> anyhow::Result<Vec<AssessmentComponent>> {
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<AssessmentComponent> {
        Ok(AssessmentComponent {
            id: r.get(0)?,
            subject_id: r.get(1)?,
            name: r.get(2)?,
            weight: r.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
        })
    };
    let rows = match subject_id {
        Some(sid) => {
            let mut stmt = conn.prepare(
                "SELECT id, subject_id, name, weight FROM assessment_components
                 WHERE teacher_id = ? AND subject_id = ? ORDER BY rowid",
            )?;
            let rows = stmt
                .query_map(params![teacher_id, sid], map_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT id, subject_id, name, weight FROM assessment_components
                 WHERE teacher_id = ? ORDER BY rowid",
            )?;
            let rows = stmt
                .query_map([teacher_id], map_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };
    Ok(rows)
}

pub fn load_students(conn: &Connection, teacher_id: &str) -> anyhow::Result<Vec<Student>> {
    let mut stmt = conn.prepare(
        "SELECT id, first_name, last_name, grade_level_id
         FROM students WHERE teacher_id = ? ORDER BY last_name, first_name, id",
    )?;
    let rows = stmt
        .query_map([teacher_id], |r| {
            Ok(Student {
                id: r.get(0)?,
                first_name: r.get(1)?,
                last_name: r.get(2)?,
                grade_level_id: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn load_scores(conn: &Connection, teacher_id: &str, subject_id: &str) -> anyhow::Result<Vec<StudentScore>> {
    let mut stmt = conn.prepare(
        "SELECT id, student_id, subject_id, exam_score, class_assessment_scores, updated_at
         FROM student_scores WHERE teacher_id = ? AND subject_id = ? ORDER BY rowid",
    )?;
    let raw = stmt
        .query_map(params![teacher_id, subject_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, Option<f64>>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, Option<String>>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(raw.len());
    for (id, student_id, subject_id, exam_score, components_json, updated_at) in raw {
        let class_assessment_scores: BTreeMap<String, f64> = serde_json::from_str(&components_json)?;
        out.push(StudentScore {
            id,
            student_id,
            subject_id,
            exam_score,
            class_assessment_scores,
            updated_at,
        });
    }
    Ok(out)
}

/// Entity collections for one teacher, without scores (those are read per subject
/// through the score cache).
pub fn load_dataset(conn: &Connection, teacher_id: &str) -> anyhow::Result<Dataset> {
    Ok(Dataset {
        grade_levels: load_grade_levels(conn, teacher_id)?,
        academic_years: load_academic_years(conn, teacher_id)?,
        trimesters: load_trimesters(conn, teacher_id)?,
        subjects: load_subjects(conn, teacher_id)?,
        components: load_components(conn, teacher_id, None)?,
        students: load_students(conn, teacher_id)?,
        scores: Vec::new(),
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportCounts {
    pub grade_levels: usize,
    pub academic_years: usize,
    pub trimesters: usize,
    pub subjects: usize,
    pub components: usize,
    pub students: usize,
    pub scores: usize,
}

fn written(rows: usize, kind: Owned, id: &str) -> anyhow::Result<()> {
    if rows == 0 {
        anyhow::bail!("{} {} belongs to another teacher", kind.label(), id);
    }
    Ok(())
}

/// Writes a validated dataset in one transaction, parents before children. Nothing is
/// kept if any row turns out to belong to another teacher.
pub fn import_dataset(conn: &Connection, teacher_id: &str, data: &Dataset) -> anyhow::Result<ImportCounts> {
    let tx = conn.unchecked_transaction()?;
    for g in &data.grade_levels {
        written(upsert_grade_level(&tx, teacher_id, g)?, Owned::GradeLevel, &g.id)?;
    }
    for y in &data.academic_years {
        written(upsert_academic_year(&tx, teacher_id, y)?, Owned::AcademicYear, &y.id)?;
    }
    for t in &data.trimesters {
        written(upsert_trimester(&tx, teacher_id, t)?, Owned::Trimester, &t.id)?;
    }
    for s in &data.subjects {
        written(upsert_subject(&tx, teacher_id, s)?, Owned::Subject, &s.id)?;
    }
    for c in &data.components {
        written(upsert_component(&tx, teacher_id, c)?, Owned::Component, &c.id)?;
    }
    for s in &data.students {
        written(upsert_student(&tx, teacher_id, s)?, Owned::Student, &s.id)?;
    }
    for s in &data.scores {
        written(upsert_score(&tx, teacher_id, s)?, Owned::Score, &s.id)?;
    }
    tx.commit()?;
    Ok(ImportCounts {
        grade_levels: data.grade_levels.len(),
        academic_years: data.academic_years.len(),
        trimesters: data.trimesters.len(),
        subjects: data.subjects.len(),
        components: data.components.len(),
        students: data.students.len(),
        scores: data.scores.len(),
    })
}

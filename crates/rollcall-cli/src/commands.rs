//! Subcommand handlers.

use std::{io::Read as _, path::Path, sync::Arc};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use rollcall_attendance::{
  Admin, AttendanceRecord, CheckIn, CheckInLink, ClassView, LiveAttendance, LiveEvent, Location,
  Report, SessionRecord, SessionState, Status, Student,
};
use rollcall_core::PublicKey;
use tokio::sync::Notify;

use crate::{Command, RosterCommand, SessionCommand, config::Settings, identity, peer::Peer};

pub async fn run(command: Command, settings: &Settings) -> Result<()> {
  match command {
    Command::Keygen { force } => {
      let identity = identity::create(&settings.identity_path, force)?;
      eprintln!("wrote {}", settings.identity_path.display());
      println!("{}", identity.public_key());
      Ok(())
    }
    Command::Whoami => {
      let identity = identity::load(&settings.identity_path)?;
      println!("{}", identity.public_key());
      Ok(())
    }
    Command::Roster(command) => roster(command, settings).await,
    Command::Session(command) => session(command, settings).await,
    Command::Link => {
      let peer = open(settings).await?;
      let link = admin(&peer, settings)?.check_in_link()?;
      println!("{}", link.to_url(&settings.link_base));
      peer.close().await
    }
    Command::Checkin { link, session, admin, student, lat, lon } => {
      let link = match (link, session, admin) {
        (Some(url), ..) => url.parse::<CheckInLink>()?,
        (None, Some(session), Some(admin)) => CheckInLink::new(session, PublicKey::parse(&admin)?)?,
        _ => bail!("pass --link, or both --session and --admin"),
      };
      let location = lat.zip(lon).map(|(latitude, longitude)| Location { latitude, longitude });

      let peer = open(settings).await?;
      let record = CheckIn::new(peer.graph.clone(), &link).submit(&student, location)?;
      println!("checked in {} ({}) at {}", record.name, record.student_id, time(record.timestamp));
      peer.close().await
    }
    Command::Watch { session, admin } => watch(session, admin, settings).await,
    Command::Report { session, admin, json } => {
      let peer = open(settings).await?;
      let report = view(&peer, settings, admin.as_deref())?.report(session.as_deref())?;
      if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
      } else {
        print_report(&report);
      }
      peer.close().await
    }
  }
}

// ─── Roster ───────────────────────────────────────────────────────────────────

async fn roster(command: RosterCommand, settings: &Settings) -> Result<()> {
  let peer = open(settings).await?;
  match command {
    RosterCommand::Add { id, name } => {
      admin(&peer, settings)?.add_student(&Student::new(id, name))?;
    }
    RosterCommand::Import { file } => {
      let payload = read_input(&file)?;
      let count = admin(&peer, settings)?.import_roster(&payload)?;
      println!("imported {count} students");
    }
    RosterCommand::List { admin, json } => {
      let students = view(&peer, settings, admin.as_deref())?.roster()?;
      if json {
        println!("{}", serde_json::to_string_pretty(&students)?);
      } else {
        for student in students {
          println!("{}\t{}", student.student_id, student.name);
        }
      }
    }
  }
  peer.close().await
}

// ─── Sessions ─────────────────────────────────────────────────────────────────

async fn session(command: SessionCommand, settings: &Settings) -> Result<()> {
  let peer = open(settings).await?;
  match command {
    SessionCommand::Start => {
      let admin = admin(&peer, settings)?;
      let session = admin.start_session()?;
      println!("session {} started at {}", session.session_id, time(session.created_at));
      println!("{}", admin.check_in_link()?.to_url(&settings.link_base));
    }
    SessionCommand::Stop => {
      let session = admin(&peer, settings)?.stop_session()?;
      println!("session {} stopped", session.session_id);
    }
    SessionCommand::Status { admin } => match view(&peer, settings, admin.as_deref())?.session_state()? {
      SessionState::NoSession => println!("no session"),
      SessionState::Active(s) => println!("active: {} (since {})", s.session_id, time(s.created_at)),
      SessionState::Stopped(s) => println!("stopped: {} (started {})", s.session_id, time(s.created_at)),
    },
    SessionCommand::History { admin, json } => {
      let history = view(&peer, settings, admin.as_deref())?.history()?;
      if json {
        println!("{}", serde_json::to_string_pretty(&history)?);
      } else {
        for session in &history {
          print_session(session);
        }
      }
    }
  }
  peer.close().await
}

// ─── Watch ────────────────────────────────────────────────────────────────────

async fn watch(session: Option<String>, admin: Option<String>, settings: &Settings) -> Result<()> {
  let peer = open(settings).await?;
  let _journal = peer.persist_continuously();
  let class = view(&peer, settings, admin.as_deref())?;
  let session_id = match session {
    Some(id) => id,
    None => match class.session_state()?.session() {
      Some(session) => session.session_id.clone(),
      None => bail!("no session to watch"),
    },
  };

  eprintln!("watching {session_id}; Ctrl-C to stop");
  let stopped = Arc::new(Notify::new());
  let on_stop = stopped.clone();
  let live = LiveAttendance::start(&peer.graph, class.admin(), &session_id, move |event| match event {
    LiveEvent::CheckIn(record) => print_record(record, ""),
    LiveEvent::Late(record) => print_record(record, "\tlate"),
    LiveEvent::Stopped(at) => {
      eprintln!("session stopped at {}", time(at));
      on_stop.notify_one();
    }
  })?;
  // Ends on Ctrl-C, or once the session stops.
  tokio::select! {
    result = tokio::signal::ctrl_c() => result.context("waiting for Ctrl-C")?,
    () = stopped.notified() => {}
  }

  let tally = live.tally(&class.roster()?);
  eprintln!(
    "{} present, {} absent, {} not on the roster, {} late",
    tally.present, tally.absent, tally.unlisted, tally.late
  );
  drop(live);
  peer.close().await
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

async fn open(settings: &Settings) -> Result<Peer> {
  let peer = Peer::open(settings).await?;
  peer.sync().await;
  Ok(peer)
}

fn admin(peer: &Peer, settings: &Settings) -> Result<Admin> {
  let identity = identity::load(&settings.identity_path)?;
  Ok(Admin::new(peer.graph.scoped(identity)))
}

/// The class of `admin`, or of this peer's own identity.
fn view(peer: &Peer, settings: &Settings, admin: Option<&str>) -> Result<ClassView> {
  let key = match admin {
    Some(key) => PublicKey::parse(key)?,
    None => identity::load(&settings.identity_path)?.public_key().clone(),
  };
  Ok(ClassView::new(peer.graph.clone(), key))
}

fn read_input(file: &Path) -> Result<String> {
  if file == Path::new("-") {
    let mut payload = String::new();
    std::io::stdin().read_to_string(&mut payload).context("reading stdin")?;
    return Ok(payload);
  }
  std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))
}

fn time(ms: u64) -> String {
  i64::try_from(ms)
    .ok()
    .and_then(DateTime::<Utc>::from_timestamp_millis)
    .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
    .unwrap_or_else(|| ms.to_string())
}

fn print_record(record: &AttendanceRecord, flag: &str) {
  match record.location() {
    Some(at) => println!(
      "{}\t{}\t{}\t{:.5},{:.5}{flag}",
      time(record.timestamp),
      record.student_id,
      record.name,
      at.latitude,
      at.longitude
    ),
    None => println!("{}\t{}\t{}{flag}", time(record.timestamp), record.student_id, record.name),
  }
}

fn print_session(session: &SessionRecord) {
  match session.stopped_at {
    Some(stopped) => {
      println!("{}\t{}\t{}", session.session_id, time(session.created_at), time(stopped))
    }
    None => println!("{}\t{}\t-", session.session_id, time(session.created_at)),
  }
}

fn print_report(report: &Report) {
  print_session(&report.session);
  for row in &report.rows {
    let status = match row.status {
      Status::Present if row.late => "late",
      Status::Present => "present",
      Status::Absent => "absent",
    };
    let at = row.record.as_ref().map(|r| time(r.timestamp)).unwrap_or_default();
    println!("{}\t{}\t{}\t{}", row.student_id, row.name, status, at);
  }
  for record in &report.unlisted {
    println!("{}\t{}\tnot on roster\t{}", record.student_id, record.name, time(record.timestamp));
  }
  println!("{} present ({} late), {} absent", report.present(), report.late(), report.absent());
}

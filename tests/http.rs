use once_cell::sync::Lazy;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::net::TcpListener;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Module {
    id: String,
    completed_sessions: u32,
    total_sessions: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Progress {
    user_id: String,
    modules: Vec<Module>,
    total_completed_sessions: u32,
    overall_progress: u32,
}

impl Progress {
    fn completed(&self, id: &str) -> u32 {
        self.modules
            .iter()
            .find(|m| m.id == id)
            .map(|m| m.completed_sessions)
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Streak {
    current_streak: u32,
    longest_streak: u32,
    total_activities: u64,
}

#[derive(Debug, Deserialize)]
struct ActivityResponse {
    streak: Streak,
    progress: Progress,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    patient_id: String,
    patient_name: String,
    therapist_id: String,
}

struct TestServer {
    base_url: String,
    child: Child,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

static TEST_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));
static SERVER: Lazy<Mutex<Option<Arc<TestServer>>>> = Lazy::new(|| Mutex::new(None));

#[cfg(unix)]
mod cleanup {
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Once;

    static REGISTER: Once = Once::new();
    static PID: AtomicI32 = AtomicI32::new(0);

    pub fn register(pid: u32) {
        REGISTER.call_once(|| {
            PID.store(pid as i32, Ordering::SeqCst);
            unsafe {
                libc::atexit(on_exit);
            }
        });
    }

    extern "C" fn on_exit() {
        let pid = PID.load(Ordering::SeqCst);
        if pid > 0 {
            unsafe {
                libc::kill(pid, libc::SIGTERM);
            }
        }
    }
}

fn pick_free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind random port");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

fn unique_data_dir() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let mut path = std::env::temp_dir();
    path.push(format!("therapy_progress_http_{}_{}", std::process::id(), nanos));
    path.to_string_lossy().to_string()
}

async fn wait_until_ready(base_url: &str) {
    let client = Client::new();
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        if let Ok(resp) = client.get(format!("{base_url}/api/modules")).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        if Instant::now() > deadline {
            panic!("server did not become ready");
        }
        sleep(Duration::from_millis(100)).await;
    }
}

async fn spawn_server() -> TestServer {
    let port = pick_free_port();
    let child = Command::new(env!("CARGO_BIN_EXE_therapy_progress"))
        .env("PORT", port.to_string())
        .env("APP_DATA_DIR", unique_data_dir())
        .env("RUST_LOG", "info")
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .expect("failed to spawn server");

    #[cfg(unix)]
    cleanup::register(child.id());

    let base_url = format!("http://127.0.0.1:{port}");
    wait_until_ready(&base_url).await;

    TestServer { base_url, child }
}

async fn shared_server() -> Arc<TestServer> {
    let mut guard = SERVER.lock().await;
    if let Some(server) = guard.as_ref() {
        return Arc::clone(server);
    }
    let server = Arc::new(spawn_server().await);
    *guard = Some(Arc::clone(&server));
    server
}

#[tokio::test]
async fn http_module_completion_caps_at_thirty() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let client = Client::new();
    let url = format!("{}/api/progress/cap-patient/modules/cbt/complete", server.base_url);

    let mut last: Option<Progress> = None;
    for _ in 0..31 {
        let response = client.post(&url).send().await.unwrap();
        assert!(response.status().is_success());
        last = Some(response.json().await.unwrap());
    }
    let progress = last.unwrap();
    assert_eq!(progress.user_id, "cap-patient");
    assert_eq!(progress.completed("cbt"), 30);
    assert_eq!(progress.total_completed_sessions, 30);
    assert_eq!(progress.overall_progress, 8);
    assert!(progress.modules.iter().all(|m| m.total_sessions == 30));

    let stats: serde_json::Value = client
        .get(format!("{}/api/progress/cap-patient/modules/cbt", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats, serde_json::json!({ "completed": 30, "total": 30, "percentage": 100 }));
}

#[tokio::test]
async fn http_activity_reports_to_booked_therapist() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let client = Client::new();

    let booking = client
        .post(format!("{}/api/bookings", server.base_url))
        .json(&serde_json::json!({
            "patientId": "booked-patient",
            "patientName": "Robin",
            "therapistId": "therapist-1",
            "date": "2026-01-10"
        }))
        .send()
        .await
        .unwrap();
    assert!(booking.status().is_success());

    let before: Streak = client
        .get(format!("{}/api/streak", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let activity: ActivityResponse = client
        .post(format!("{}/api/activity", server.base_url))
        .json(&serde_json::json!({ "userId": "booked-patient", "moduleId": "mood" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(activity.progress.completed("mood"), 1);
    assert_eq!(activity.streak.total_activities, before.total_activities + 1);
    assert!(activity.streak.current_streak >= 1);
    assert!(activity.streak.longest_streak >= activity.streak.current_streak);

    let reports: Vec<Report> = client
        .get(format!("{}/api/therapists/therapist-1/reports", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].patient_id, "booked-patient");
    assert_eq!(reports[0].patient_name, "Robin");
    assert_eq!(reports[0].therapist_id, "therapist-1");

    let index: serde_json::Value = client
        .get(format!("{}/api/progress", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(index.get("booked-patient").is_some());
}

#[tokio::test]
async fn http_unknown_module_and_bad_ids() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let client = Client::new();

    let progress: Progress = client
        .post(format!("{}/api/progress/quiet-patient/modules/xyz/complete", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(progress.total_completed_sessions, 0);

    let rejected = client
        .post(format!("{}/api/activity", server.base_url))
        .json(&serde_json::json!({ "userId": "no spaces!", "moduleId": "cbt" }))
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
}

//! Demo page: a counter with a clock child that is mounted on demand.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use liveview_runtime::{Component, ComponentError, Driver, HandlerTable};
use liveview_server::Page;
use tracing::debug;

const COUNTER_ID: &str = "counter";
const CLOCK_ID: &str = "clock";
const CLOCK_ANCHOR: &str = "mount_span_clock";
const RESET_INPUT: &str = "reset_to";

/// Build the demo page served at `/`.
pub fn page() -> Page {
    Page::new("/", || Driver::root(COUNTER_ID, COUNTER_ID, Counter::default()))
        .title("liveview demo")
        .head("<style>body{font-family:sans-serif;margin:2rem}button{margin-right:.5rem}</style>")
}

#[derive(Debug, Default)]
pub struct Counter {
    count: i64,
    clock_visible: bool,
}

impl Component for Counter {
    fn render(&self) -> Result<String, ComponentError> {
        let toggle = if self.clock_visible {
            r#"<button onclick="send_event('counter','HideClock')">hide clock</button>"#
        } else {
            r#"<button onclick="send_event('counter','ShowClock')">show clock</button>"#
        };
        Ok(format!(
            concat!(
                "<h1>{count}</h1>",
                "<button onclick=\"send_event('counter','Decrement')\">-</button>",
                "<button onclick=\"send_event('counter','Increment')\">+</button>",
                "<p><input id=\"{input}\" placeholder=\"reset to\">",
                "<button onclick=\"send_event('counter','Reset')\">reset</button></p>",
                "<p>{toggle}</p>",
                "<span id=\"{clock}\"></span>"
            ),
            count = self.count,
            input = RESET_INPUT,
            toggle = toggle,
            clock = CLOCK_ANCHOR,
        ))
    }

    fn handlers(table: &mut HandlerTable<Self>) {
        let _ = table
            .on("Increment", |driver: Arc<Driver<Self>>, _| async move {
                driver.update(|c| c.count += 1);
                let _ = driver.commit();
                Ok(())
            })
            .on("Decrement", |driver: Arc<Driver<Self>>, _| async move {
                driver.update(|c| c.count -= 1);
                let _ = driver.commit();
                Ok(())
            })
            .on("Reset", |driver: Arc<Driver<Self>>, _| async move {
                let raw = driver.get_value(RESET_INPUT).await;
                let value = raw.trim().parse::<i64>().unwrap_or(0);
                driver.update(|c| c.count = value);
                let _ = driver.commit();
                let _ = driver.set_value(RESET_INPUT, "");
                Ok(())
            })
            .on("ShowClock", |driver: Arc<Driver<Self>>, _| async move {
                show_clock(&driver).await;
                Ok(())
            })
            .on("HideClock", |driver: Arc<Driver<Self>>, _| async move {
                let _ = driver.unmount(CLOCK_ANCHOR);
                driver.update(|c| c.clock_visible = false);
                let _ = driver.commit();
                Ok(())
            });
    }
}

/// Mount a clock under the counter and keep it ticking until it is
/// unmounted or the session ends.
async fn show_clock(parent: &Arc<Driver<Counter>>) {
    if parent.child(CLOCK_ANCHOR).is_some() {
        return;
    }
    let Some(scope) = parent.scope() else {
        return;
    };

    parent.update(|c| c.clock_visible = true);
    let _ = parent.commit();

    let clock = Driver::new(CLOCK_ID, Clock::now());
    let _ = parent.mount_with_start(CLOCK_ANCHOR, clock.clone()).await;
    let _ = clock.commit();

    let session = scope.clone();
    let parent = Arc::clone(parent);
    let ticker = scope.spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                () = session.closing() => break,
                _ = interval.tick() => {}
            }
            let mounted = parent
                .child(CLOCK_ANCHOR)
                .is_some_and(|node| node.component_id() == clock.component_id());
            if !mounted {
                break;
            }
            clock.update(Clock::tick);
            let _ = clock.commit();
        }
        debug!("clock stopped");
    });
    if ticker.is_none() {
        debug!("session closing, clock not started");
    }
}

#[derive(Debug)]
pub struct Clock {
    time: String,
}

impl Clock {
    fn now() -> Self {
        let mut clock = Self {
            time: String::new(),
        };
        clock.tick();
        clock
    }

    fn tick(&mut self) {
        self.time = Local::now().format("%H:%M:%S").to_string();
    }
}

impl Component for Clock {
    fn render(&self) -> Result<String, ComponentError> {
        Ok(format!("<code>{}</code>", self.time))
    }
}

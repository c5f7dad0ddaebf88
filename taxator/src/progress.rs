use std::{
	io::Write,
	time::{Duration, Instant},
};

const REDRAW: Duration = Duration::from_millis(100);
const LABEL_WIDTH: usize = 14;

/// Terminal bar for work with a known amount of steps.
pub struct Progress {
	name: &'static str,
	start: Instant,
	drawn: Instant,
	current: usize,
	goal: usize,
}

impl Progress {
	pub fn new(name: &'static str, goal: usize) -> Self {
		let start = Instant::now();
		let progress = Self {
			name,
			start,
			drawn: start,
			current: 0,
			goal: goal.max(1),
		};
		progress.draw();
		progress
	}

	pub fn step(&mut self) {
		self.step_by(1);
	}

	pub fn step_by(&mut self, amount: usize) {
		self.current = (self.current + amount).min(self.goal);
		if self.drawn.elapsed() >= REDRAW {
			self.drawn = Instant::now();
			self.draw();
		}
	}

	fn draw(&self) {
		let columns = termsize::get().map_or(80, |size| size.cols as usize);
		let width = columns.saturating_sub(LABEL_WIDTH + 20).max(10);
		let line = format!(
			"{} {} {} {:>3}%\r",
			label(self.name),
			clock(self.start.elapsed()),
			bar(self.current, self.goal, width),
			self.current * 100 / self.goal,
		);
		let mut stdout = std::io::stdout().lock();
		// output errors are ignored
		let _ = stdout.write_all(line.as_bytes());
		let _ = stdout.flush();
	}

	/// Seconds since the bar was created.
	pub fn finish(mut self) -> f32 {
		self.current = self.goal;
		self.draw();
		println!();
		self.start.elapsed().as_secs_f32()
	}
}

/// Timer for a step without progress information.
pub struct Stage {
	name: &'static str,
	start: Instant,
}

impl Stage {
	pub fn new(name: &'static str) -> Self {
		print!("{} {} ...\r", label(name), clock(Duration::ZERO));
		let _ = std::io::stdout().flush();
		Self {
			name,
			start: Instant::now(),
		}
	}

	/// Seconds since the stage started.
	pub fn finish(self) -> f32 {
		let elapsed = self.start.elapsed();
		println!("{} {} done", label(self.name), clock(elapsed));
		elapsed.as_secs_f32()
	}
}

fn label(name: &str) -> String {
	format!("{:<width$}", format!("{}:", name), width = LABEL_WIDTH)
}

fn clock(elapsed: Duration) -> String {
	let seconds = elapsed.as_secs();
	format!("[{:02}:{:02}:{:02}]", seconds / 3600, seconds / 60 % 60, seconds % 60)
}

fn bar(current: usize, goal: usize, width: usize) -> String {
	let filled = current * width / goal;
	format!("|{}{}|", "=".repeat(filled), " ".repeat(width - filled))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_clock() {
		assert_eq!(clock(Duration::from_secs(0)), "[00:00:00]");
		assert_eq!(clock(Duration::from_secs(3 * 3600 + 25 * 60 + 7)), "[03:25:07]");
	}

	#[test]
	fn test_bar() {
		assert_eq!(bar(0, 4, 8), "|        |");
		assert_eq!(bar(1, 4, 8), "|==      |");
		assert_eq!(bar(4, 4, 8), "|========|");
	}

	#[test]
	fn test_label_is_aligned() {
		assert_eq!(label("Read").len(), LABEL_WIDTH);
		assert!(label("Read").starts_with("Read:"));
	}
}

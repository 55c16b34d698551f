use std::path::Path;

use console::Style;
use livestack_core::session::SessionConfig;
use livestack_core::stack::{Stack, StackProperties};

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    disabled: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            disabled: Style::new().dim().yellow(),
            path: Style::new().underlined(),
        }
    }
}

fn rule(s: &Styles, title: &str) {
    println!();
    println!("  {}", s.title.apply_to(title));
    println!("  {}", s.title.apply_to("\u{2550}".repeat(title.chars().count())));
    println!();
}

fn toggle(s: &Styles, enabled: bool, detail: String) -> String {
    if enabled {
        s.method.apply_to(detail).to_string()
    } else {
        s.disabled.apply_to("off").to_string()
    }
}

/// Settings of every stack about to be watched.
pub fn print_session_summary<'a>(
    config: &SessionConfig,
    stacks: impl IntoIterator<Item = &'a Stack>,
    out_dir: &Path,
) {
    let s = Styles::new();
    rule(&s, "Live Stack Session");

    println!(
        "  {:<14}{}",
        s.label.apply_to("Output"),
        s.path.apply_to(out_dir.display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Settle"),
        s.value.apply_to(format!("{}s", config.settle_time_secs))
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Rescan"),
        toggle(&s, config.rescan_after_contention, "after contention".into())
    );

    for stack in stacks {
        println!();
        println!("  {}", s.header.apply_to(stack.main_view_id()));
        println!(
            "    {:<12}{}",
            s.label.apply_to("Reference"),
            s.path.apply_to(stack.reference_path().display())
        );
        println!(
            "    {:<12}{}",
            s.label.apply_to("Watching"),
            s.path.apply_to(stack.path_to_watch().display())
        );
        let filter = if stack.config.watch.ignore_filter {
            s.disabled.apply_to("any").to_string()
        } else {
            s.value.apply_to(&stack.config.watch.filter).to_string()
        };
        println!("    {:<12}{}", s.label.apply_to("Filter"), filter);
        println!(
            "    {:<12}{}",
            s.label.apply_to("Calibrate"),
            toggle(&s, stack.is_calibrated(), "masters".into())
        );
        let color = &stack.config.color;
        println!(
            "    {:<12}{}",
            s.label.apply_to("Debayer"),
            toggle(&s, color.is_cfa, color.cfa_pattern.to_string())
        );
        let p = &stack.config.processing;
        println!(
            "    {:<12}{}",
            s.label.apply_to("Downscale"),
            toggle(&s, p.downscale_images, format!("x{}", p.downscale_amount))
        );
        println!(
            "    {:<12}{}",
            s.label.apply_to("ABE"),
            toggle(&s, p.run_abe, format!("degree {}", p.abe_degree))
        );
        println!(
            "    {:<12}{}",
            s.label.apply_to("SCNR"),
            toggle(&s, p.scnr, format!("{:.2}", p.scnr_amount))
        );
        println!(
            "    {:<12}{}",
            s.label.apply_to("Noise"),
            toggle(&s, p.run_noise_eval, "MRS".into())
        );
        if let Some(path) = stack.image_path() {
            println!(
                "    {:<12}{}",
                s.label.apply_to("Image"),
                s.path.apply_to(path.display())
            );
        }
    }
    println!();
}

/// Final state of a stopped stack.
pub fn print_stack_result(stack: &Stack) {
    let s = Styles::new();
    println!("  {}", s.header.apply_to(stack.main_view_id()));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Frames"),
        s.value.apply_to(stack.frames_folded())
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Ignored"),
        s.value.apply_to(stack.ignored_files().len())
    );
    if let Some(noise) = stack.noise_history().last() {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Noise"),
            s.value.apply_to(format!("{noise:.3e}"))
        );
    }
    match (stack.export(), stack.image_path()) {
        (true, Some(path)) => println!(
            "    {:<12}{}",
            s.label.apply_to("Saved"),
            s.path.apply_to(path.display())
        ),
        _ => println!(
            "    {:<12}{}",
            s.label.apply_to("Saved"),
            s.disabled.apply_to("discarded")
        ),
    }
}

/// Persisted sidecar of an exported stack.
pub fn print_properties(image: &Path, props: &StackProperties) {
    let s = Styles::new();
    rule(&s, "Live Stack");

    println!(
        "  {:<14}{}",
        s.label.apply_to("Image"),
        s.path.apply_to(image.display())
    );
    println!();
    for (key, value) in props.iter() {
        let shown = if value.is_empty() {
            s.disabled.apply_to("-").to_string()
        } else {
            s.value.apply_to(value).to_string()
        };
        println!("  {:<18}{}", s.label.apply_to(key), shown);
    }
    println!();
}

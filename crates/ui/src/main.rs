use chirp::app::{ChirpAppShell, Quit};
use chirp::theme::apply_theme;
use chirp_client::SettingsStore;
use gpui::*;
use gpui_component::Root;
use gpui_component::notification::NotificationList;

fn main() {
    tracing_subscriber::fmt::init();

    let app = Application::new().with_assets(gpui_component_assets::Assets);

    app.run(|cx| {
        gpui_tokio_bridge::init(cx);
        // Must run before any Root is created.
        gpui_component::init(cx);

        let settings = SettingsStore::load();
        tracing::info!(
            path = %settings.config_path().display(),
            backend = settings.settings().backend.name(),
            "loaded settings"
        );
        apply_theme(settings.settings().theme_mode, None, cx);

        cx.on_action(|_: &Quit, cx| {
            cx.quit();
        });
        cx.bind_keys([
            KeyBinding::new("cmd-q", Quit, None),
            KeyBinding::new("ctrl-q", Quit, None),
        ]);

        cx.spawn(async move |cx| {
            cx.update(|cx| {
                let options = WindowOptions {
                    window_bounds: Some(WindowBounds::Windowed(Bounds::centered(
                        None,
                        size(px(960.), px(720.)),
                        cx,
                    ))),
                    titlebar: Some(TitlebarOptions {
                        title: Some("Chirp".into()),
                        ..Default::default()
                    }),
                    ..Default::default()
                };

                cx.open_window(options, |window, cx| {
                    let notification_list = cx.new(|cx| NotificationList::new(window, cx));
                    let shell = cx
                        .new(|cx| ChirpAppShell::new(settings, notification_list, window, cx));
                    cx.new(|cx| Root::new(shell, window, cx))
                })
                .expect("failed to open main window");

                cx.activate(true);
            })
        })
        .detach();
    });
}

fn main() {
    #[cfg(feature = "tauri")]
    {
        const COMMANDS: &[&str] = &[
            "get_initial_share",
            "on_intent_listener",
            "remove_intent_listener",
        ];

        tauri_plugin::Builder::new(COMMANDS).build();
    }
}

// Intentionally left without submodules: no source files exist under src/persistence/
// for the `store`/`accounts`/`autosave` modules referenced elsewhere in the crate.
